//! Kubernetes task-group runner
//!
//! Provisions one Pod per task group: a container per task running the
//! addon, the lite-engine sidecar and the `setup-addon` init container, plus
//! the Secrets they consume.

pub mod cluster;
pub mod containers;
pub mod names;
pub mod pod;
pub mod ports;
pub mod resources;
pub mod runner;
pub mod secrets;
pub mod security_context;
pub mod volumes;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use containers::ContainerAssembler;
pub use pod::{PodAssembler, PodParts};
pub use ports::{PortAllocator, RESERVED_ADDON_PORT, RESERVED_LE_PORT};
pub use runner::{PodRef, ProvisioningPlan, RunnerState, TaskRunner};
pub use secrets::SecretProvisioner;
pub use volumes::VolumePlan;
