//! Delegate Kubernetes runner
//!
//! Provisions the ephemeral Pod a CI task group runs in: one container per
//! task, a lite-engine sidecar that drives the steps, an init container that
//! installs the addon, and the Secrets the tasks and the registry pulls need.

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types
pub use config::{PodCreateErrorPolicy, RunnerConfig};
pub use domain::entities::{EncryptedSecret, ExecutionInfrastructure, StepRuntime, TaskDescriptor};
pub use error::{AppError, Result};
pub use infrastructure::runners::litek8s::{
    ClusterClient, KubeClusterClient, PodRef, ProvisioningPlan, RunnerState, TaskRunner,
};
pub use services::encryption::{LocalSecretDecryptor, SecretDecryptor};
