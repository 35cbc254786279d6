//! Pod assembly

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Pod, PodSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::names;
use crate::config::RunnerConfig;

/// Hard cap on how long a task-group Pod may run
pub const ACTIVE_DEADLINE_SECONDS: i64 = 86_400;
pub const RESTART_POLICY: &str = "Never";

/// Everything that goes into one task-group Pod besides its identity
#[derive(Debug, Clone, Default)]
pub struct PodParts {
    /// Task containers followed by the lite-engine
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub image_pull_secret_names: Vec<String>,
}

pub struct PodAssembler<'a> {
    config: &'a RunnerConfig,
}

impl<'a> PodAssembler<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self { config }
    }

    pub fn assemble(&self, task_group_id: &str, parts: PodParts) -> Pod {
        let image_pull_secrets: Vec<LocalObjectReference> = parts
            .image_pull_secret_names
            .into_iter()
            .map(|name| LocalObjectReference { name: Some(name) })
            .collect();

        Pod {
            metadata: ObjectMeta {
                name: Some(names::pod_name(task_group_id)),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(names::group_labels(task_group_id)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: parts.containers,
                init_containers: Some(parts.init_containers),
                volumes: Some(parts.volumes),
                image_pull_secrets: (!image_pull_secrets.is_empty()).then_some(image_pull_secrets),
                restart_policy: Some(RESTART_POLICY.to_string()),
                active_deadline_seconds: Some(ACTIVE_DEADLINE_SECONDS),
                service_account_name: Some(self.config.service_account.clone()),
                automount_service_account_token: Some(true),
                runtime_class_name: (!self.config.runtime_class.is_empty())
                    .then(|| self.config.runtime_class.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_shape() {
        let config = RunnerConfig::new("acct", "token", "https://logs.example.com")
            .with_namespace("ci-builds");
        let pod = PodAssembler::new(&config).assemble(
            "Group_1",
            PodParts {
                containers: vec![container("task-build"), container("lite-engine")],
                init_containers: vec![container("setup-addon")],
                volumes: Vec::new(),
                image_pull_secret_names: vec!["image-group-1-0".to_string()],
            },
        );

        assert_eq!(pod.metadata.name.as_deref(), Some("pod-group-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("ci-builds"));
        assert_eq!(
            pod.metadata.labels.as_ref().unwrap()[names::TASK_GROUP_LABEL],
            "group-1"
        );

        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.init_containers.unwrap().len(), 1);
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.active_deadline_seconds, Some(86_400));
        assert_eq!(spec.automount_service_account_token, Some(true));
        assert_eq!(spec.runtime_class_name.as_deref(), Some("gvisor"));
        assert_eq!(spec.service_account_name.as_deref(), Some("default"));
        assert_eq!(
            spec.image_pull_secrets.unwrap()[0].name.as_deref(),
            Some("image-group-1-0")
        );
    }

    #[test]
    fn test_no_pull_secrets_leaves_field_unset() {
        let config = RunnerConfig::new("acct", "token", "https://logs.example.com");
        let pod = PodAssembler::new(&config).assemble("g", PodParts::default());
        assert!(pod.spec.unwrap().image_pull_secrets.is_none());
    }
}
