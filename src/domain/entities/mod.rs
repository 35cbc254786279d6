//! Domain entities for task-group provisioning

pub mod infra;
pub mod task;

pub use infra::{AddonContainerSpec, ExecutionInfrastructure, LiteEngineSpec, StorageResource};
pub use task::{
    EncryptedSecret, ResourceSpec, SecurityContextSpec, StepRuntime, TaskDescriptor,
};
