pub mod litek8s;

pub use litek8s::{ClusterClient, KubeClusterClient, PodRef, ProvisioningPlan, RunnerState, TaskRunner};
