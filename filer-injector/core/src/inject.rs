use crate::{
    naming::{self, UsedNames},
    patch,
    policy::MutationPolicy,
    template::SidecarTemplate,
    Container, CredentialRecord, Error, ObjectMeta, Pod, Settings, VolumeMount,
};
use json_patch::{Patch, PatchOperation};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};


/// Turns a pod and the credentials in its namespace into a patch that injects
/// one filer sidecar per valid credential.
#[derive(Clone, Debug)]
pub struct Injector {
    template: SidecarTemplate,
    policy: MutationPolicy,
    settings: Settings,
}

/// The outcome of building a patch for one pod.
#[derive(Clone, Debug)]
pub struct Injection {
    /// Names of the injected sidecar containers, in patch order.
    pub sidecars: Vec<String>,

    /// Number of credentials skipped because of missing fields.
    pub skipped: usize,

    pub patch: Patch,
}

/// The shape of the pod once every operation emitted so far is applied.
#[derive(Debug)]
struct PodState {
    containers: usize,
    volumes: usize,
    annotations: Option<BTreeMap<String, String>>,
    mounts: Vec<usize>,
    /// Mount paths already taken in workload containers.
    mount_paths: BTreeSet<String>,
}

const MOUNT_PROPAGATION: &str = "HostToContainer";

// === impl Injector ===

impl Injector {
    pub fn new(template: SidecarTemplate, settings: Settings) -> Self {
        Self {
            policy: MutationPolicy::new(settings.eligibility_label.clone()),
            template,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_mutation_required(&self, metadata: &ObjectMeta) -> bool {
        self.policy.is_mutation_required(metadata)
    }

    /// Serializes the patch built by [`Injector::build`].
    pub fn build_patch(
        &self,
        pod: &Pod,
        ns: &str,
        credentials: &[CredentialRecord],
        annotations: &BTreeMap<String, String>,
    ) -> Result<Vec<u8>, Error> {
        self.build(pod, ns, credentials, annotations)?.to_bytes()
    }

    /// Builds the operations that add a sidecar, its volumes, the status
    /// `annotations` and a workload mount for every valid credential, in
    /// listing order.
    pub fn build(
        &self,
        pod: &Pod,
        ns: &str,
        credentials: &[CredentialRecord],
        annotations: &BTreeMap<String, String>,
    ) -> Result<Injection, Error> {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();
        let workloads = containers
            .iter()
            .enumerate()
            .filter(|(_, c)| self.is_workload(c))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        let mut state = PodState::new(pod, &workloads);
        let mut used = UsedNames::default();
        let mut sidecars = Vec::new();
        let mut skipped = 0;
        let mut ops = Vec::<PatchOperation>::new();

        for credential in credentials {
            if !credential.is_valid() {
                warn!(
                    %ns,
                    secret = %credential.source_name,
                    missing = ?credential.missing_fields(),
                    "Skipping secret with empty fields",
                );
                skipped += 1;
                continue;
            }

            let token = naming::make_name_token(credential.filer(), &credential.mount_path, &mut used);
            let sidecar = self.template.instantiate(credential, &token, ns);

            ops.extend(patch::add_containers(
                state.containers,
                std::slice::from_ref(&sidecar.container),
            )?);
            state.containers += 1;

            ops.extend(patch::add_volumes(state.volumes, &sidecar.volumes)?);
            state.volumes += sidecar.volumes.len();

            ops.extend(patch::update_annotations(
                state.annotations.as_ref(),
                annotations,
            ));
            if !annotations.is_empty() {
                state
                    .annotations
                    .get_or_insert_with(Default::default)
                    .extend(annotations.clone());
            }

            let mount_path = state.claim_mount_path(format!(
                "{}/{}/{}",
                self.settings.filers_root.trim_end_matches('/'),
                credential.filer(),
                credential.mount_path.trim_end_matches('/'),
            ));
            let mount = VolumeMount {
                name: sidecar.csi_volume().name.clone(),
                mount_path,
                read_only: Some(false),
                mount_propagation: Some(MOUNT_PROPAGATION.to_string()),
                ..Default::default()
            };
            for &index in &workloads {
                ops.push(patch::add_volume_mount(
                    index,
                    state.mounts[index],
                    &mount,
                )?);
                state.mounts[index] += 1;
            }

            debug!(%ns, secret = %credential.source_name, sidecar = %token, "Injecting sidecar");
            sidecars.push(token);
        }

        Ok(Injection {
            sidecars,
            skipped,
            patch: Patch(ops),
        })
    }

    /// Workload containers are the ones that receive the bucket mounts.
    fn is_workload(&self, container: &Container) -> bool {
        container
            .env
            .iter()
            .flatten()
            .any(|var| var.name == self.settings.workload_env_marker)
    }
}

// === impl Injection ===

impl Injection {
    pub fn is_empty(&self) -> bool {
        self.patch.0.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.patch)?)
    }
}

// === impl PodState ===

impl PodState {
    fn new(pod: &Pod, workloads: &[usize]) -> Self {
        let spec = pod.spec.as_ref();
        let containers = spec.map(|s| s.containers.as_slice()).unwrap_or_default();
        Self {
            containers: containers.len(),
            volumes: spec
                .and_then(|s| s.volumes.as_ref())
                .map_or(0, Vec::len),
            annotations: pod.metadata.annotations.clone(),
            mounts: containers
                .iter()
                .map(|c| c.volume_mounts.as_ref().map_or(0, Vec::len))
                .collect(),
            mount_paths: workloads
                .iter()
                .flat_map(|&i| containers[i].volume_mounts.iter().flatten())
                .map(|m| m.mount_path.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    /// Returns `path`, or `path-<n>` for the lowest `n >= 2` that no workload
    /// container mounts yet, and marks it as taken.
    fn claim_mount_path(&mut self, path: String) -> String {
        let mut claimed = path.clone();
        let mut ordinal = 2;
        while self.mount_paths.contains(&claimed) {
            claimed = format!("{path}-{ordinal}");
            ordinal += 1;
        }
        if claimed != path {
            warn!(%path, mount_path = %claimed, "Mount path already in use");
        }
        self.mount_paths.insert(claimed.clone());
        claimed
    }
}
