#![allow(dead_code)]

use async_trait::async_trait;
use delegate_k8s_runner::domain::entities::{EncryptedSecret, ExecutionInfrastructure};
use delegate_k8s_runner::infrastructure::runners::litek8s::names;
use delegate_k8s_runner::services::encryption::DecryptedSecrets;
use delegate_k8s_runner::{
    AppError, ClusterClient, LocalSecretDecryptor, Result, RunnerConfig, SecretDecryptor,
    TaskRunner,
};
use k8s_openapi::api::core::v1::{Pod, Secret};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory API server: create-only, 409 on a taken name
#[derive(Default)]
pub struct MockCluster {
    secrets: Arc<RwLock<BTreeMap<String, Secret>>>,
    pods: Arc<RwLock<BTreeMap<String, Pod>>>,
    deleted_secrets: Arc<RwLock<Vec<String>>>,
    failing_secrets: Arc<RwLock<HashSet<String>>>,
    pod_failure: Arc<RwLock<Option<u16>>>,
    calls: Arc<RwLock<usize>>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn object_name(name: &Option<String>) -> String {
    name.clone().unwrap_or_default()
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating the named Secret fails with a 500
    pub async fn fail_secret(&self, name: &str) {
        self.failing_secrets.write().await.insert(name.to_string());
    }

    /// Creating any Pod fails with `code`
    pub async fn fail_pods_with(&self, code: u16) {
        *self.pod_failure.write().await = Some(code);
    }

    pub async fn secret_names(&self) -> Vec<String> {
        self.secrets.read().await.keys().cloned().collect()
    }

    pub async fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.read().await.get(&key(namespace, name)).cloned()
    }

    pub async fn pod_names(&self) -> Vec<String> {
        self.pods.read().await.keys().cloned().collect()
    }

    pub async fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods.read().await.get(&key(namespace, name)).cloned()
    }

    pub async fn deleted_secrets(&self) -> Vec<String> {
        self.deleted_secrets.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        *self.calls.read().await
    }

    async fn record_call(&self) {
        *self.calls.write().await += 1;
    }
}

fn already_exists(kind: &str, name: &str) -> AppError {
    AppError::cluster(
        Some(409),
        "AlreadyExists",
        format!("{} \"{}\" already exists", kind, name),
    )
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
        _field_manager: &str,
    ) -> Result<Secret> {
        self.record_call().await;
        let name = object_name(&secret.metadata.name);
        if self.failing_secrets.read().await.contains(&name) {
            return Err(AppError::cluster(Some(500), "InternalError", "etcd unavailable"));
        }

        let mut secrets = self.secrets.write().await;
        let key = key(namespace, &name);
        if secrets.contains_key(&key) {
            return Err(already_exists("secrets", &name));
        }
        secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod, _field_manager: &str) -> Result<Pod> {
        self.record_call().await;
        let name = object_name(&pod.metadata.name);
        if let Some(code) = *self.pod_failure.read().await {
            return Err(AppError::cluster(Some(code), "Forbidden", "pod rejected"));
        }

        let mut pods = self.pods.write().await;
        let key = key(namespace, &name);
        if pods.contains_key(&key) {
            return Err(already_exists("pods", &name));
        }

        let mut created = pod.clone();
        created.metadata.uid = Some(format!("uid-{}", name));
        pods.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.record_call().await;
        self.secrets.write().await.remove(&key(namespace, name));
        self.deleted_secrets.write().await.push(name.to_string());
        Ok(())
    }
}

/// Decryptor that rejects every blob
pub struct FailingDecryptor;

#[async_trait]
impl SecretDecryptor for FailingDecryptor {
    async fn decrypt(&self, _secret: &EncryptedSecret) -> Result<DecryptedSecrets> {
        Err(AppError::DecryptionError("key service unavailable".to_string()))
    }
}

pub const NAMESPACE: &str = "ci-builds";

/// Name of the Secret `init` creates for `task_id` in `group`
pub fn secret_name(group: &str, task_id: &str) -> String {
    names::task_secret_name(group, task_id)
}

pub fn test_config() -> RunnerConfig {
    RunnerConfig::new("acct-1", "delegate-token", "https://logs.example.com").with_namespace(NAMESPACE)
}

pub fn test_decryptor() -> Arc<LocalSecretDecryptor> {
    Arc::new(LocalSecretDecryptor::new(&LocalSecretDecryptor::generate_key()).unwrap())
}

pub fn test_infra() -> ExecutionInfrastructure {
    let mut infra = ExecutionInfrastructure::new("harness/ci-addon:1.16", "harness/ci-lite-engine:1.16");
    infra.resource.cpu = "1".to_string();
    infra.resource.memory = "2Gi".to_string();
    infra.log_prefix = "acct-1/pipeline/stage".to_string();
    infra.log_token = "log-token".to_string();
    infra
}

pub fn wire(infra: &ExecutionInfrastructure) -> Vec<u8> {
    infra.to_wire().unwrap()
}

/// Runner wired to a fresh mock cluster and a local decryptor
pub struct Harness {
    pub runner: TaskRunner,
    pub cluster: Arc<MockCluster>,
    pub decryptor: Arc<LocalSecretDecryptor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        let cluster = Arc::new(MockCluster::new());
        let decryptor = test_decryptor();
        let runner = TaskRunner::new(config, decryptor.clone(), cluster.clone()).unwrap();
        Self {
            runner,
            cluster,
            decryptor,
        }
    }
}
