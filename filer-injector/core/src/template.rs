use crate::{Container, CredentialRecord, Volume};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// The on-disk form of the sidecar configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SidecarConfig {
    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default)]
    pub volumes: Vec<Volume>,
}

/// A validated sidecar blueprint: one FUSE container, the emptyDir used to
/// pass the mounted file descriptor, and the CSI ephemeral volume that
/// receives it.
///
/// The template is shared by every request and is only ever read; each
/// injected sidecar is instantiated from a clone.
#[derive(Clone, Debug, PartialEq)]
pub struct SidecarTemplate {
    container: Container,
    fd_passing: Volume,
    csi: Volume,
}

/// A sidecar specialized for one credential.
#[derive(Clone, Debug, PartialEq)]
pub struct Sidecar {
    pub container: Container,

    /// The fd-passing emptyDir followed by the CSI ephemeral volume.
    pub volumes: [Volume; 2],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("sidecar configuration must define exactly one container, found {0}")]
    Containers(usize),

    #[error("sidecar configuration must define exactly two volumes, found {0}")]
    Volumes(usize),

    #[error("sidecar container must define at least 3 env vars, found {0}")]
    Env(usize),

    #[error("sidecar container must define at least one volume mount")]
    VolumeMounts,

    #[error("second sidecar volume must be a CSI volume")]
    NotCsi,
}

/// Env slots overwritten per sidecar: the proxy socket path, the access key
/// and the secret key, in that order.
const ENV_SLOTS: usize = 3;

const FD_PASSING_ATTRIBUTE: &str = "fdPassingEmptyDirName";

/// Kubernetes rejects container and volume names longer than a DNS label.
const MAX_NAME_LEN: usize = 63;

// === impl SidecarTemplate ===

impl TryFrom<SidecarConfig> for SidecarTemplate {
    type Error = TemplateError;

    fn try_from(config: SidecarConfig) -> Result<Self, TemplateError> {
        let SidecarConfig {
            containers,
            volumes,
        } = config;

        let container = match <[Container; 1]>::try_from(containers) {
            Ok([container]) => container,
            Err(containers) => return Err(TemplateError::Containers(containers.len())),
        };
        let env = container.env.as_ref().map_or(0, Vec::len);
        if env < ENV_SLOTS {
            return Err(TemplateError::Env(env));
        }
        if container
            .volume_mounts
            .as_ref()
            .is_none_or(|mounts| mounts.is_empty())
        {
            return Err(TemplateError::VolumeMounts);
        }

        let [fd_passing, csi] = match <[Volume; 2]>::try_from(volumes) {
            Ok(volumes) => volumes,
            Err(volumes) => return Err(TemplateError::Volumes(volumes.len())),
        };
        if csi.csi.is_none() {
            return Err(TemplateError::NotCsi);
        }

        Ok(Self {
            container,
            fd_passing,
            csi,
        })
    }
}

impl SidecarTemplate {
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Specializes a copy of the template for `credential`, naming every
    /// object after `token` and the pod's namespace.
    pub fn instantiate(&self, credential: &CredentialRecord, token: &str, ns: &str) -> Sidecar {
        let Self {
            mut container,
            mut fd_passing,
            mut csi,
        } = self.clone();

        let proxy = format!("fusermount3-proxy-{token}-{ns}");
        let fd_passing_name = format!("fuse-fd-passing-{token}-{ns}");

        container.name = token.to_string();
        container.args = Some(vec!["-c".to_string(), mount_command(credential)]);

        if let Some(env) = container.env.as_mut() {
            let values = [
                format!("{proxy}/fuse-csi-ephemeral.sock"),
                credential.access_key.clone(),
                credential.secret_key.clone(),
            ];
            for (var, value) in env.iter_mut().zip(values) {
                var.value = Some(value);
            }
        }

        if let Some(mount) = container
            .volume_mounts
            .as_mut()
            .and_then(|mounts| mounts.first_mut())
        {
            mount.name = fd_passing_name.clone();
            mount.mount_path = proxy;
        }

        fd_passing.name = fd_passing_name.clone();

        csi.name = csi_volume_name(token, ns);
        if let Some(source) = csi.csi.as_mut() {
            source
                .volume_attributes
                .get_or_insert_with(Default::default)
                .insert(FD_PASSING_ATTRIBUTE.to_string(), fd_passing_name);
        }

        let sidecar = Sidecar {
            container,
            volumes: [fd_passing, csi],
        };
        let oversized = sidecar.oversized_names();
        if !oversized.is_empty() {
            warn!(%ns, sidecar = %token, names = ?oversized, "Sidecar names exceed the 63 character limit");
        }
        sidecar
    }
}

// === impl Sidecar ===

impl Sidecar {
    pub fn name(&self) -> &str {
        &self.container.name
    }

    pub fn fd_passing_volume(&self) -> &Volume {
        &self.volumes[0]
    }

    pub fn csi_volume(&self) -> &Volume {
        &self.volumes[1]
    }

    /// Names of the container and volumes that the API server would reject
    /// for being too long.
    pub fn oversized_names(&self) -> Vec<&str> {
        std::iter::once(self.name())
            .chain(self.volumes.iter().map(|v| v.name.as_str()))
            .filter(|name| name.len() > MAX_NAME_LEN)
            .collect()
    }
}

pub fn csi_volume_name(token: &str, ns: &str) -> String {
    format!("fuse-csi-ephemeral-{token}-{ns}")
}

/// Mounts the bucket with goofys and then keeps the container alive, since the
/// pod treats an exited sidecar as failed.
fn mount_command(credential: &CredentialRecord) -> String {
    format!(
        "/goofys --cheap --endpoint {} --http-timeout 1500s --dir-mode 0777 --file-mode 0777  \
         --debug_fuse --debug_s3 -o allow_other -f {}/ /tmp; echo sleeping...; sleep infinity",
        credential.endpoint_url, credential.mount_path,
    )
}
