//! Container assembly
//!
//! Three container shapes make up a task-group Pod: one container per task
//! running the addon, the `setup-addon` init container that installs the
//! addon binaries, and the `lite-engine` sidecar that orchestrates the steps.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, SecretEnvSource, VolumeMount,
};
use std::collections::BTreeMap;
use tracing::warn;

use super::names;
use super::ports::RESERVED_LE_PORT;
use super::resources::resource_requirements;
use super::security_context;
use super::volumes::WORKSPACE_MOUNT_PATH;
use crate::config::RunnerConfig;
use crate::domain::entities::{ExecutionInfrastructure, TaskDescriptor};
use crate::error::{AppError, Result};

pub const SETUP_ADDON_CONTAINER_NAME: &str = "setup-addon";
pub const LITE_ENGINE_CONTAINER_NAME: &str = "lite-engine";
pub const IMAGE_PULL_POLICY: &str = "Always";

pub const ADDON_RUN_COMMAND: &str = "/addon/bin/ci-addon";
const ADDON_PORT_FLAG: &str = "--port";

const ADDON_INIT_CPU: &str = "100m";
const ADDON_INIT_MEMORY: &str = "100Mi";

/// Installs the addon and its helper tools into the shared addon volume.
pub const ADDON_SETUP_SCRIPT: &str = "mkdir -p /addon/bin; mkdir -p /addon/tmp; chmod -R 776 /addon/tmp; \
if [ -e /usr/local/bin/ci-addon-linux-amd64 ];then cp /usr/local/bin/ci-addon-linux-amd64 /addon/bin/ci-addon;\
else cp /usr/local/bin/ci-addon-linux /addon/bin/ci-addon;fi; chmod +x /addon/bin/ci-addon; \
cp /usr/local/bin/tmate /addon/bin/tmate; chmod +x /addon/bin/tmate; \
cp /usr/local/bin/java-agent.jar /addon/bin/java-agent.jar; chmod +x /addon/bin/java-agent.jar; \
if [ -e /usr/local/bin/split_tests ];then cp /usr/local/bin/split_tests /addon/bin/split_tests; \
chmod +x /addon/bin/split_tests; export PATH=$PATH:/addon/bin; fi;";

pub const HARNESS_ACCOUNT_ID: &str = "HARNESS_ACCOUNT_ID";
pub const HARNESS_LOG_PREFIX: &str = "HARNESS_LOG_PREFIX";
pub const HARNESS_LOG_SERVICE_ENDPOINT: &str = "HARNESS_LOG_SERVICE_ENDPOINT";
pub const HARNESS_LOG_SERVICE_TOKEN: &str = "HARNESS_LOG_SERVICE_TOKEN";
pub const DELEGATE_TOKEN: &str = "DELEGATE_TOKEN";
pub const TASK_PARAMETERS_FILE: &str = "TASK_PARAMETERS_FILE";
pub const TASK_DATA_PATH: &str = "TASK_DATA_PATH";
pub const TASK_ID: &str = "TASK_ID";

pub const HARNESS_WORKSPACE: &str = "HARNESS_WORKSPACE";
pub const HARNESS_CI_INDIRECT_LOG_UPLOAD_FF: &str = "HARNESS_CI_INDIRECT_LOG_UPLOAD_FF";
pub const HARNESS_LE_STATUS_REST_ENABLED: &str = "HARNESS_LE_STATUS_REST_ENABLED";
pub const DELEGATE_SERVICE_ENDPOINT: &str = "DELEGATE_SERVICE_ENDPOINT";
pub const DELEGATE_SERVICE_ID: &str = "DELEGATE_SERVICE_ID";

/// Env keys the runner owns on task containers; a task-declared value for
/// any of them is replaced.
pub const RESERVED_TASK_ENV: [&str; 8] = [
    HARNESS_ACCOUNT_ID,
    HARNESS_LOG_PREFIX,
    HARNESS_LOG_SERVICE_ENDPOINT,
    HARNESS_LOG_SERVICE_TOKEN,
    DELEGATE_TOKEN,
    TASK_PARAMETERS_FILE,
    TASK_DATA_PATH,
    TASK_ID,
];

fn env_vars(env: BTreeMap<String, String>) -> Vec<EnvVar> {
    env.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            value_from: None,
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

fn container_port(port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        ..Default::default()
    }
}

pub struct ContainerAssembler<'a> {
    config: &'a RunnerConfig,
}

impl<'a> ContainerAssembler<'a> {
    pub fn new(config: &'a RunnerConfig) -> Self {
        Self { config }
    }

    /// Log-stream context every container that talks to the log service gets
    fn log_env(&self, infra: &ExecutionInfrastructure) -> BTreeMap<String, String> {
        BTreeMap::from([
            (HARNESS_ACCOUNT_ID.to_string(), self.config.account_id.clone()),
            (HARNESS_LOG_PREFIX.to_string(), infra.log_prefix.clone()),
            (
                HARNESS_LOG_SERVICE_ENDPOINT.to_string(),
                self.config.log_service_url.clone(),
            ),
            (HARNESS_LOG_SERVICE_TOKEN.to_string(), infra.log_token.clone()),
        ])
    }

    /// Task env with the reserved keys layered on top
    pub fn task_env(
        &self,
        infra: &ExecutionInfrastructure,
        task: &TaskDescriptor,
    ) -> BTreeMap<String, String> {
        let mut reserved = self.log_env(infra);
        reserved.insert(DELEGATE_TOKEN.to_string(), self.config.delegate_token.clone());
        reserved.insert(
            TASK_PARAMETERS_FILE.to_string(),
            self.config.delegate_task_params_file.clone(),
        );
        reserved.insert(
            TASK_DATA_PATH.to_string(),
            self.config.delegate_task_params_file.clone(),
        );
        reserved.insert(TASK_ID.to_string(), task.id.clone());

        let mut env = task.runtime.env.clone();
        for (key, value) in reserved {
            if env.contains_key(&key) {
                warn!(
                    "Task {} declares reserved env var {}; the runner value wins",
                    task.id, key
                );
            }
            env.insert(key, value);
        }
        env
    }

    pub fn task_container(
        &self,
        infra: &ExecutionInfrastructure,
        task: &TaskDescriptor,
        port: i32,
        secret_name: Option<&str>,
        volume_mounts: Vec<VolumeMount>,
    ) -> Result<Container> {
        let runtime = &task.runtime;
        let resources = match &runtime.resource {
            Some(resource) => Some(resource_requirements(&resource.cpu, &resource.memory)?),
            None => None,
        };

        let env_from = secret_name.map(|name| {
            vec![EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: Some(name.to_string()),
                    optional: None,
                }),
                ..Default::default()
            }]
        });

        Ok(Container {
            name: names::container_name(&task.id),
            image: Some(runtime.image.clone()),
            command: Some(vec![ADDON_RUN_COMMAND.to_string()]),
            args: Some(vec![ADDON_PORT_FLAG.to_string(), port.to_string()]),
            ports: Some(vec![container_port(port)]),
            env: Some(env_vars(self.task_env(infra, task))),
            env_from,
            resources,
            security_context: security_context::resolve(
                runtime.security_context.as_ref(),
                &runtime.image,
            ),
            working_dir: non_empty(&runtime.working_dir),
            image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        })
    }

    /// `setup-addon`. Without an explicit command the built-in install script
    /// runs under `sh -c`.
    pub fn addon_init_container(
        &self,
        infra: &ExecutionInfrastructure,
        volume_mounts: Vec<VolumeMount>,
    ) -> Result<Container> {
        let spec = &infra.addon_container;
        let (command, args) = if spec.command.is_empty() {
            (
                vec!["sh".to_string(), "-c".to_string(), "--".to_string()],
                vec![ADDON_SETUP_SCRIPT.to_string()],
            )
        } else {
            (spec.command.clone(), spec.args.clone())
        };

        Ok(Container {
            name: SETUP_ADDON_CONTAINER_NAME.to_string(),
            image: Some(spec.image.clone()),
            command: Some(command),
            args: (!args.is_empty()).then_some(args),
            env: Some(env_vars(self.log_env(infra))),
            resources: Some(resource_requirements(ADDON_INIT_CPU, ADDON_INIT_MEMORY)?),
            working_dir: non_empty(&spec.working_dir),
            image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        })
    }

    /// `lite-engine`, sized by the infra resource envelope
    pub fn lite_engine_container(
        &self,
        infra: &ExecutionInfrastructure,
        volume_mounts: Vec<VolumeMount>,
    ) -> Result<Container> {
        let spec = &infra.le_container;
        let port = match spec.port {
            None => RESERVED_LE_PORT,
            Some(port) if port == RESERVED_LE_PORT => port,
            Some(port) => {
                return Err(AppError::ConfigurationError(format!(
                    "lite-engine must listen on port {}, got {}",
                    RESERVED_LE_PORT, port
                )))
            }
        };

        let env = BTreeMap::from([
            (HARNESS_WORKSPACE.to_string(), WORKSPACE_MOUNT_PATH.to_string()),
            (HARNESS_CI_INDIRECT_LOG_UPLOAD_FF.to_string(), "true".to_string()),
            (HARNESS_LE_STATUS_REST_ENABLED.to_string(), "true".to_string()),
            (
                DELEGATE_SERVICE_ENDPOINT.to_string(),
                self.config.delegate_service_endpoint.clone(),
            ),
            (
                DELEGATE_SERVICE_ID.to_string(),
                self.config.delegate_service_id.clone(),
            ),
            (HARNESS_ACCOUNT_ID.to_string(), self.config.account_id.clone()),
            (
                HARNESS_LOG_SERVICE_ENDPOINT.to_string(),
                self.config.log_service_url.clone(),
            ),
            (HARNESS_LOG_SERVICE_TOKEN.to_string(), infra.log_token.clone()),
        ]);

        Ok(Container {
            name: LITE_ENGINE_CONTAINER_NAME.to_string(),
            image: Some(spec.image.clone()),
            ports: Some(vec![container_port(port)]),
            env: Some(env_vars(env)),
            resources: Some(resource_requirements(
                &infra.resource.cpu,
                &infra.resource.memory,
            )?),
            working_dir: non_empty(&spec.working_dir),
            image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        })
    }
}
