use crate::{
    admission::Admission,
    config::load_template,
    core::{Injector, Settings},
    metrics::AdmissionMetrics,
    secrets::KubeSecrets,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::path::PathBuf;
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "filer-injector",
    about = "Injects filer sidecars into notebook pods"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "filer_injector=info,warn",
        env = "FILER_INJECTOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Path to the YAML sidecar template.
    #[clap(long, default_value = "/etc/webhook/config/sidecarconfig.yaml")]
    sidecar_config: PathBuf,

    /// Label that marks a pod as eligible for injection.
    #[clap(long, default_value = "notebook-name")]
    eligibility_label: String,

    /// Substring that identifies filer connection secrets.
    #[clap(long, default_value = "filer-conn-secret")]
    secret_marker: String,

    /// Env var that identifies workload containers.
    #[clap(long, default_value = "NB_PREFIX")]
    workload_env_marker: String,

    #[clap(long, default_value = "/home/jovyan/filers")]
    filers_root: String,

    #[clap(long, default_value = "5000")]
    list_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            sidecar_config,
            eligibility_label,
            secret_marker,
            workload_env_marker,
            filers_root,
            list_timeout_ms,
        } = self;

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("filer_injector"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        // The template is read once; changes require a restart.
        let template = load_template(&sidecar_config)?;
        let injector = Injector::new(
            template,
            Settings {
                eligibility_label,
                secret_marker: secret_marker.clone(),
                workload_env_marker,
                filers_root,
            },
        );
        info!(settings = ?injector.settings(), "Configured injector");

        let admission = Admission::new(
            injector,
            KubeSecrets::new(runtime.client(), secret_marker),
            Duration::from_millis(list_timeout_ms),
            metrics,
        );
        let runtime = runtime.spawn_server(admission);

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
