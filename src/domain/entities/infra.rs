//! Execution infrastructure
//!
//! Describes the Pod a task group runs in: the lite-engine sidecar, the addon
//! bootstrap container, shared storage, image-pull credentials and the
//! log-stream context. It arrives in a wire form (JSON or YAML bytes) and is
//! unpacked once per provisioning call.

use serde::{Deserialize, Serialize};

use super::task::{EncryptedSecret, ResourceSpec};
use crate::error::{AppError, Result};

/// Pod-level infrastructure for one task group
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionInfrastructure {
    /// Resource envelope for the lite-engine sidecar, sized to the whole group
    #[serde(default)]
    pub resource: ResourceSpec,
    /// Encrypted registry credentials, one pull secret per entry
    #[serde(default)]
    pub image_pull_secrets: Vec<EncryptedSecret>,
    /// Additional storage declared for the group
    #[serde(default)]
    pub storage: Vec<StorageResource>,
    /// Addon bootstrap (init) container
    pub addon_container: AddonContainerSpec,
    /// Lite-engine sidecar container
    pub le_container: LiteEngineSpec,
    /// Log stream prefix handed to every container
    #[serde(default)]
    pub log_prefix: String,
    /// Log-service auth token
    #[serde(default)]
    pub log_token: String,
}

/// Addon bootstrap container; empty command/args select the built-in script
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddonContainerSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Lite-engine sidecar container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiteEngineSpec {
    pub image: String,
    /// Must be unset or the reserved lite-engine port
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// A declared storage resource, materialized as an `emptyDir` volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageResource {
    /// Volume name
    pub name: String,
    /// Mount path inside the task and sidecar containers
    pub mount_path: String,
    /// Optional `emptyDir` size limit, e.g. `1Gi`
    #[serde(default)]
    pub size_limit: Option<String>,
    /// Optional `emptyDir` medium, e.g. `Memory`
    #[serde(default)]
    pub medium: Option<String>,
}

impl std::fmt::Debug for ExecutionInfrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionInfrastructure")
            .field("resource", &self.resource)
            .field("image_pull_secrets", &self.image_pull_secrets.len())
            .field("storage", &self.storage)
            .field("addon_container", &self.addon_container)
            .field("le_container", &self.le_container)
            .field("log_prefix", &self.log_prefix)
            .field("log_token", &"<redacted>")
            .finish()
    }
}

impl ExecutionInfrastructure {
    pub fn new(addon_image: impl Into<String>, le_image: impl Into<String>) -> Self {
        Self {
            resource: ResourceSpec::default(),
            image_pull_secrets: Vec::new(),
            storage: Vec::new(),
            addon_container: AddonContainerSpec {
                image: addon_image.into(),
                ..Default::default()
            },
            le_container: LiteEngineSpec {
                image: le_image.into(),
                ..Default::default()
            },
            log_prefix: String::new(),
            log_token: String::new(),
        }
    }

    /// Unpack the wire form. JSON objects are read as JSON, anything else
    /// as YAML.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
        let infra: ExecutionInfrastructure = match first {
            None => {
                return Err(AppError::ConfigurationError(
                    "Execution infrastructure payload is empty".to_string(),
                ))
            }
            Some(b'{') => serde_json::from_slice(bytes)?,
            Some(_) => serde_yaml::from_slice(bytes)?,
        };
        infra.validate()?;
        Ok(infra)
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks the fields provisioning cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.le_container.image.trim().is_empty() {
            return Err(AppError::ConfigurationError(
                "lite-engine container image is required".to_string(),
            ));
        }
        if self.addon_container.image.trim().is_empty() {
            return Err(AppError::ConfigurationError(
                "addon container image is required".to_string(),
            ));
        }
        for storage in &self.storage {
            if storage.name.trim().is_empty() {
                return Err(AppError::ConfigurationError(
                    "storage resource name is required".to_string(),
                ));
            }
            if !storage.mount_path.starts_with('/') {
                return Err(AppError::ConfigurationError(format!(
                    "storage resource '{}' needs an absolute mount path, got '{}'",
                    storage.name, storage.mount_path
                )));
            }
        }
        Ok(())
    }
}
