//! Kubernetes API access
//!
//! The runner only ever creates Secrets and Pods, and deletes Secrets it
//! created itself when a later create in the same provisioning pass fails.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use crate::error::{AppError, Result};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_secret(&self, namespace: &str, secret: &Secret, field_manager: &str)
        -> Result<Secret>;

    async fn create_pod(&self, namespace: &str, pod: &Pod, field_manager: &str) -> Result<Pod>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

fn post_params(field_manager: &str) -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(field_manager.to_string()),
    }
}

/// `ClusterClient` backed by a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster service account or the local kubeconfig.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            AppError::cluster(
                None,
                "ClientInit",
                format!("Failed to create Kubernetes client: {}", e),
            )
        })?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
        field_manager: &str,
    ) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&post_params(field_manager), secret).await?;
        debug!(
            "Created secret {} in namespace {}",
            created.metadata.name.as_deref().unwrap_or_default(),
            namespace
        );
        Ok(created)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod, field_manager: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&post_params(field_manager), pod).await?;
        debug!(
            "Created pod {} in namespace {}",
            created.metadata.name.as_deref().unwrap_or_default(),
            namespace
        );
        Ok(created)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
