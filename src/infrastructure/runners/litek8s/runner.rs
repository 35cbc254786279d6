//! Task-group provisioning orchestrator
//!
//! `init` turns a task group into one Pod: it decrypts secrets, plans
//! volumes and ports, assembles containers and then submits Secrets followed
//! by the Pod. Everything up to the submit step is pure and available on its
//! own through [`TaskRunner::plan`].

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Pod, Secret};
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cluster::ClusterClient;
use super::containers::ContainerAssembler;
use super::names;
use super::pod::{PodAssembler, PodParts};
use super::ports::PortAllocator;
use super::secrets::SecretProvisioner;
use super::volumes::VolumePlan;
use crate::config::{PodCreateErrorPolicy, RunnerConfig};
use crate::domain::entities::{ExecutionInfrastructure, TaskDescriptor};
use crate::error::{AppError, Result};
use crate::services::encryption::SecretDecryptor;

const REDACTED: &[u8] = b"<redacted>";

/// Settled groups kept in the state table before the oldest are dropped
pub const DEFAULT_STATE_CAPACITY: usize = 1024;

/// Provisioning state of one task group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RunnerState {
    #[default]
    Uninitialized,
    Provisioning,
    Provisioned,
    Failed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunnerState::Uninitialized => "uninitialized",
            RunnerState::Provisioning => "provisioning",
            RunnerState::Provisioned => "provisioned",
            RunnerState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Every object `init` would create, in creation order
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    pub task_group_id: String,
    pub namespace: String,
    pub image_pull_secrets: Vec<Secret>,
    /// Task Secrets keyed by task id
    pub task_secrets: BTreeMap<String, Secret>,
    pub pod: Pod,
}

impl ProvisioningPlan {
    /// Pull secrets first, then task secrets
    pub fn secrets(&self) -> impl Iterator<Item = &Secret> {
        self.image_pull_secrets
            .iter()
            .chain(self.task_secrets.values())
    }

    pub fn pod_name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    /// Copy of the plan with every Secret value replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let redact = |secret: &Secret| {
            let mut secret = secret.clone();
            if let Some(data) = secret.data.as_mut() {
                for value in data.values_mut() {
                    *value = ByteString(REDACTED.to_vec());
                }
            }
            secret
        };

        Self {
            task_group_id: self.task_group_id.clone(),
            namespace: self.namespace.clone(),
            image_pull_secrets: self.image_pull_secrets.iter().map(redact).collect(),
            task_secrets: self
                .task_secrets
                .iter()
                .map(|(task_id, secret)| (task_id.clone(), redact(secret)))
                .collect(),
            pod: self.pod.clone(),
        }
    }
}

/// Handle to a provisioned task-group Pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    /// Set once the API server accepted the Pod
    pub uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub secret_names: Vec<String>,
}

/// State table entry; `seq` orders updates for eviction
#[derive(Debug, Clone, Copy)]
struct TrackedState {
    state: RunnerState,
    seq: u64,
}

#[derive(Debug, Default)]
struct StateTable {
    entries: HashMap<String, TrackedState>,
    next_seq: u64,
}

impl StateTable {
    fn get(&self, task_group_id: &str) -> Option<RunnerState> {
        self.entries.get(task_group_id).map(|tracked| tracked.state)
    }

    fn insert(&mut self, task_group_id: &str, state: RunnerState) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(task_group_id.to_string(), TrackedState { state, seq });
    }

    /// Drop the least recently updated settled groups until at most
    /// `capacity` entries remain. Groups still provisioning and `keep` are
    /// never dropped.
    fn evict_settled(&mut self, capacity: usize, keep: &str) -> usize {
        let excess = self.entries.len().saturating_sub(capacity);
        if excess == 0 {
            return 0;
        }

        let mut settled: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(id, tracked)| {
                tracked.state != RunnerState::Provisioning && id.as_str() != keep
            })
            .map(|(id, tracked)| (tracked.seq, id.clone()))
            .collect();
        settled.sort_unstable();

        let evicted = settled.len().min(excess);
        for (_, id) in settled.into_iter().take(evicted) {
            self.entries.remove(&id);
        }
        evicted
    }
}

/// Which create call of a submit failed
enum SubmitFailure {
    Secret(AppError),
    Pod(AppError),
}

impl SubmitFailure {
    fn error(&self) -> &AppError {
        match self {
            SubmitFailure::Secret(e) | SubmitFailure::Pod(e) => e,
        }
    }

    fn into_error(self) -> AppError {
        match self {
            SubmitFailure::Secret(e) | SubmitFailure::Pod(e) => e,
        }
    }
}

pub struct TaskRunner {
    id: Uuid,
    config: RunnerConfig,
    decryptor: Arc<dyn SecretDecryptor>,
    cluster: Arc<dyn ClusterClient>,
    states: Arc<RwLock<StateTable>>,
    state_capacity: usize,
}

impl TaskRunner {
    pub fn new(
        config: RunnerConfig,
        decryptor: Arc<dyn SecretDecryptor>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();

        info!(
            "Created task runner {} for namespace {} (runtime class {})",
            id, config.namespace, config.runtime_class
        );

        Ok(Self {
            id,
            config,
            decryptor,
            cluster,
            states: Arc::new(RwLock::new(StateTable::default())),
            state_capacity: DEFAULT_STATE_CAPACITY,
        })
    }

    /// Cap on settled groups remembered by [`TaskRunner::state`].
    pub fn with_state_capacity(mut self, capacity: usize) -> Self {
        self.state_capacity = capacity;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub async fn state(&self, task_group_id: &str) -> RunnerState {
        self.states
            .read()
            .await
            .get(task_group_id)
            .unwrap_or_default()
    }

    /// Number of task groups with a remembered state
    pub async fn tracked_groups(&self) -> usize {
        self.states.read().await.entries.len()
    }

    /// Drop the remembered state of a task group, returning what it was.
    pub async fn forget(&self, task_group_id: &str) -> RunnerState {
        let removed = self.states.write().await.entries.remove(task_group_id);
        debug!("Forgot state of task group {}", task_group_id);
        removed.map(|tracked| tracked.state).unwrap_or_default()
    }

    async fn set_state(&self, task_group_id: &str, state: RunnerState) {
        debug!("Task group {} is now {}", task_group_id, state);
        let mut states = self.states.write().await;
        states.insert(task_group_id, state);
        let evicted = states.evict_settled(self.state_capacity, task_group_id);
        if evicted > 0 {
            debug!("Evicted {} settled task groups from the state table", evicted);
        }
    }

    /// Assemble every object for a task group without touching the cluster.
    pub async fn plan(
        &self,
        task_group_id: &str,
        tasks: &[TaskDescriptor],
        infra_wire: &[u8],
    ) -> Result<ProvisioningPlan> {
        validate_tasks(task_group_id, tasks)?;
        let infra = ExecutionInfrastructure::from_wire(infra_wire)?;

        let provisioner = SecretProvisioner::new(self.decryptor.clone(), &self.config.namespace);
        let image_pull_secrets = provisioner.image_pull_secrets(task_group_id, &infra).await?;
        let task_secrets = provisioner.task_secrets(task_group_id, tasks).await?;

        let volumes = VolumePlan::plan(&infra.storage)?;

        let assembler = ContainerAssembler::new(&self.config);
        let mut ports = PortAllocator::default();
        let mut containers = Vec::with_capacity(tasks.len() + 1);
        for task in tasks {
            let port = ports.port_for(&task.id);
            let secret_name = task_secrets
                .get(&task.id)
                .and_then(|secret| secret.metadata.name.as_deref());
            containers.push(assembler.task_container(
                &infra,
                task,
                port,
                secret_name,
                volumes.shared_mounts(),
            )?);
        }
        containers.push(assembler.lite_engine_container(&infra, volumes.shared_mounts())?);
        let init_container = assembler.addon_init_container(&infra, volumes.addon_mounts())?;

        let image_pull_secret_names = image_pull_secrets
            .iter()
            .filter_map(|secret| secret.metadata.name.clone())
            .collect();

        let pod = PodAssembler::new(&self.config).assemble(
            task_group_id,
            PodParts {
                containers,
                init_containers: vec![init_container],
                volumes: volumes.volumes,
                image_pull_secret_names,
            },
        );

        debug!(
            "Planned pod {} with {} task containers, {} pull secrets and {} task secrets",
            pod.metadata.name.as_deref().unwrap_or_default(),
            tasks.len(),
            image_pull_secrets.len(),
            task_secrets.len()
        );

        Ok(ProvisioningPlan {
            task_group_id: task_group_id.to_string(),
            namespace: self.config.namespace.clone(),
            image_pull_secrets,
            task_secrets,
            pod,
        })
    }

    /// Provision the task group: plan, then create its Secrets and its Pod.
    pub async fn init(
        &self,
        task_group_id: &str,
        tasks: &[TaskDescriptor],
        infra_wire: &[u8],
    ) -> Result<PodRef> {
        let previous = self.state(task_group_id).await;
        self.set_state(task_group_id, RunnerState::Provisioning).await;
        info!(
            "Provisioning task group {} with {} tasks in namespace {}",
            task_group_id,
            tasks.len(),
            self.config.namespace
        );

        let plan = match self.plan(task_group_id, tasks, infra_wire).await {
            Ok(plan) => plan,
            Err(e) => {
                error!("Failed to plan task group {}: {}", task_group_id, e);
                self.set_state(task_group_id, RunnerState::Failed).await;
                return Err(e);
            }
        };

        match self.submit(&plan).await {
            Ok(pod_ref) => {
                info!(
                    "Provisioned pod {} for task group {}",
                    pod_ref.name, task_group_id
                );
                self.set_state(task_group_id, RunnerState::Provisioned).await;
                Ok(pod_ref)
            }
            Err(failure) => {
                let e = failure.error();
                if e.is_conflict() && previous == RunnerState::Provisioned {
                    // The earlier Pod is still the live one.
                    warn!("Task group {} is already provisioned: {}", task_group_id, e);
                    self.set_state(task_group_id, RunnerState::Provisioned).await;
                    return Err(failure.into_error());
                }

                self.set_state(task_group_id, RunnerState::Failed).await;
                let log_only =
                    self.config.pod_create_error_policy == PodCreateErrorPolicy::LogOnly;
                match failure {
                    SubmitFailure::Pod(e) if log_only => {
                        error!(
                            "Failed to create pod {} for task group {}: {}",
                            plan.pod_name(),
                            task_group_id,
                            e
                        );
                        Ok(PodRef {
                            name: plan.pod_name().to_string(),
                            namespace: plan.namespace.clone(),
                            uid: None,
                            created_at: Utc::now(),
                            secret_names: Vec::new(),
                        })
                    }
                    failure => {
                        let e = failure.into_error();
                        error!("Failed to provision task group {}: {}", task_group_id, e);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Create the planned objects. Secrets created before a failure are
    /// removed again.
    async fn submit(&self, plan: &ProvisioningPlan) -> std::result::Result<PodRef, SubmitFailure> {
        let namespace = plan.namespace.as_str();
        let field_manager = self.config.field_manager.as_str();
        let mut created = Vec::new();

        for secret in plan.secrets() {
            match self
                .cluster
                .create_secret(namespace, secret, field_manager)
                .await
            {
                Ok(_) => {
                    if let Some(name) = &secret.metadata.name {
                        created.push(name.clone());
                    }
                }
                Err(e) => {
                    self.rollback(namespace, &created).await;
                    return Err(SubmitFailure::Secret(e));
                }
            }
        }

        let pod = match self
            .cluster
            .create_pod(namespace, &plan.pod, field_manager)
            .await
        {
            Ok(pod) => pod,
            Err(e) => {
                self.rollback(namespace, &created).await;
                return Err(SubmitFailure::Pod(e));
            }
        };

        Ok(PodRef {
            name: pod
                .metadata
                .name
                .unwrap_or_else(|| plan.pod_name().to_string()),
            namespace: namespace.to_string(),
            uid: pod.metadata.uid,
            created_at: Utc::now(),
            secret_names: created,
        })
    }

    /// Best-effort removal of Secrets created by the current `init`
    async fn rollback(&self, namespace: &str, created: &[String]) {
        for name in created.iter().rev() {
            match self.cluster.delete_secret(namespace, name).await {
                Ok(()) => debug!("Rolled back secret {}", name),
                Err(e) => warn!("Failed to roll back secret {}: {}", name, e),
            }
        }
    }

    pub async fn execute(&self, task_group_id: &str, tasks: &[TaskDescriptor]) -> Result<()> {
        warn!(
            "Execute requested for task group {} ({} tasks) but is not supported",
            task_group_id,
            tasks.len()
        );
        Err(AppError::UnsupportedOperation(
            "execute is not supported by the Kubernetes task runner".to_string(),
        ))
    }

    pub async fn cleanup(&self, task_group_id: &str) -> Result<()> {
        warn!(
            "Cleanup requested for task group {} but is not supported",
            task_group_id
        );
        Err(AppError::UnsupportedOperation(
            "cleanup is not supported by the Kubernetes task runner".to_string(),
        ))
    }
}

/// Task lists are rejected before any decryption when they cannot map onto
/// one Pod.
fn validate_tasks(task_group_id: &str, tasks: &[TaskDescriptor]) -> Result<()> {
    if task_group_id.trim().is_empty() || names::normalize_resource_name(task_group_id).is_empty()
    {
        return Err(AppError::ValidationError(format!(
            "task group id '{}' does not yield a valid resource name",
            task_group_id
        )));
    }
    if tasks.is_empty() {
        return Err(AppError::ValidationError(format!(
            "task group {} has no tasks",
            task_group_id
        )));
    }

    let mut ids = HashSet::new();
    let mut container_names = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "task group {} contains a task without an id",
                task_group_id
            )));
        }
        if task.runtime.image.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "task {} has no image",
                task.id
            )));
        }
        if !ids.insert(task.id.as_str()) {
            return Err(AppError::ValidationError(format!(
                "duplicate task id {}",
                task.id
            )));
        }
        if !container_names.insert(names::container_name(&task.id)) {
            return Err(AppError::ValidationError(format!(
                "task id {} collides with another task after name normalization",
                task.id
            )));
        }
    }
    Ok(())
}
