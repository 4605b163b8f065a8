#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use filer_injector_core as core;

mod admission;
mod args;
mod config;
mod metrics;
mod secrets;

pub use self::{
    admission::Admission,
    args::Args,
    config::{load_template, parse_template},
    metrics::AdmissionMetrics,
    secrets::{KubeSecrets, ListCredentials},
};
