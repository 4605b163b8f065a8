use crate::core::{CredentialRecord, Secret};
use anyhow::Result;
use kube::api::{Api, ListParams};
use tracing::debug;

/// Lists the filer credentials stored in a namespace.
#[async_trait::async_trait]
pub trait ListCredentials: Send + Sync {
    async fn list_credentials(&self, ns: &str) -> Result<Vec<CredentialRecord>>;
}

/// Reads credentials from the Secrets whose name contains a marker.
#[derive(Clone)]
pub struct KubeSecrets {
    client: kube::Client,
    marker: String,
}

// === impl KubeSecrets ===

impl KubeSecrets {
    pub fn new(client: kube::Client, marker: impl Into<String>) -> Self {
        Self {
            client,
            marker: marker.into(),
        }
    }
}

#[async_trait::async_trait]
impl ListCredentials for KubeSecrets {
    async fn list_credentials(&self, ns: &str) -> Result<Vec<CredentialRecord>> {
        let secrets = Api::<Secret>::namespaced(self.client.clone(), ns)
            .list(&ListParams::default())
            .await?;
        let credentials = CredentialRecord::from_secrets(&secrets.items, &self.marker);
        debug!(
            %ns,
            secrets = secrets.items.len(),
            credentials = credentials.len(),
            "Listed secrets"
        );
        Ok(credentials)
    }
}
