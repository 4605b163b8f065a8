#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Builds the JSON patches that inject filer sidecars into notebook pods.
//!
//! Each Secret in the pod's namespace that describes an S3 bucket becomes one
//! sidecar container running a FUSE mount, a pair of volumes that hand the
//! mounted file descriptor to a CSI driver, and a volume mount in the
//! workload container that exposes the bucket under the filers root.

pub mod credential;
pub mod inject;
pub mod naming;
pub mod patch;
pub mod policy;
pub mod template;

pub use self::{
    credential::CredentialRecord,
    inject::{Injection, Injector},
    naming::UsedNames,
    policy::MutationPolicy,
    template::{Sidecar, SidecarConfig, SidecarTemplate, TemplateError},
};
pub use k8s_openapi::{
    api::core::v1::{Container, Pod, Secret, Volume, VolumeMount},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

/// Annotation that lets a pod opt out of injection.
pub const INJECT_ANNOTATION: &str = "filer-injector-webhook.das-zone.statcan/inject";

/// Annotation written by the patch once sidecars have been injected.
pub const STATUS_ANNOTATION: &str = "filer-injector-webhook.das-zone.statcan/status";

/// Value of [`STATUS_ANNOTATION`] on pods that were already patched.
pub const STATUS_INJECTED: &str = "injected";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode patch value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Tunables that identify which pods, secrets, and containers take part in
/// injection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Pods must carry this label to be considered at all.
    pub eligibility_label: String,

    /// Secrets whose name contains this marker describe a filer bucket.
    pub secret_marker: String,

    /// Containers exposing this env var receive the bucket mounts.
    pub workload_env_marker: String,

    /// Directory under which buckets are mounted in the workload container.
    pub filers_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            eligibility_label: "notebook-name".to_string(),
            secret_marker: "filer-conn-secret".to_string(),
            workload_env_marker: "NB_PREFIX".to_string(),
            filers_root: "/home/jovyan/filers".to_string(),
        }
    }
}
