//! Secret provisioning
//!
//! Turns encrypted task secrets and registry credentials into Kubernetes
//! Secret objects. Decrypted values live only inside the Secret data built
//! here; they are never logged.

use base64ct::{Base64, Encoding};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::names;
use crate::domain::entities::{EncryptedSecret, ExecutionInfrastructure, TaskDescriptor};
use crate::error::{AppError, Result};
use crate::services::encryption::{DecryptedSecrets, SecretDecryptor};

pub const OPAQUE_SECRET_TYPE: &str = "Opaque";
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

const REGISTRY_KEY: &str = "registry";
const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

pub struct SecretProvisioner {
    decryptor: Arc<dyn SecretDecryptor>,
    namespace: String,
}

impl SecretProvisioner {
    pub fn new(decryptor: Arc<dyn SecretDecryptor>, namespace: impl Into<String>) -> Self {
        Self {
            decryptor,
            namespace: namespace.into(),
        }
    }

    async fn decrypt_all(&self, blobs: &[EncryptedSecret], owner: &str) -> Result<DecryptedSecrets> {
        let mut merged = DecryptedSecrets::new();
        for blob in blobs {
            let decrypted = self.decryptor.decrypt(blob).await.map_err(|e| match e {
                AppError::DecryptionError(message) => {
                    AppError::DecryptionError(format!("{}: {}", owner, message))
                }
                other => AppError::DecryptionError(format!("{}: {}", owner, other)),
            })?;
            merged.extend(decrypted);
        }
        Ok(merged)
    }

    fn secret(
        &self,
        name: String,
        task_group_id: &str,
        secret_type: &str,
        data: BTreeMap<String, ByteString>,
    ) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(names::group_labels(task_group_id)),
                ..Default::default()
            },
            type_: Some(secret_type.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// One Opaque Secret per task holding every key of every input blob.
    /// Tasks without input secrets get none.
    pub async fn task_secret(
        &self,
        task_group_id: &str,
        task: &TaskDescriptor,
    ) -> Result<Option<Secret>> {
        if task.input_secrets.is_empty() {
            return Ok(None);
        }

        let decrypted = self
            .decrypt_all(&task.input_secrets, &format!("task '{}'", task.id))
            .await?;
        debug!(
            "Decrypted {} secret keys for task {} from {} blobs",
            decrypted.len(),
            task.id,
            task.input_secrets.len()
        );

        let data = decrypted
            .into_iter()
            .map(|(key, value)| (key, ByteString(value.expose_secret().as_bytes().to_vec())))
            .collect();

        Ok(Some(self.secret(
            names::task_secret_name(task_group_id, &task.id),
            task_group_id,
            OPAQUE_SECRET_TYPE,
            data,
        )))
    }

    /// Task secrets grouped by task id. Any decryption failure fails the whole
    /// batch.
    pub async fn task_secrets(
        &self,
        task_group_id: &str,
        tasks: &[TaskDescriptor],
    ) -> Result<BTreeMap<String, Secret>> {
        let mut secrets = BTreeMap::new();
        for task in tasks {
            if let Some(secret) = self.task_secret(task_group_id, task).await? {
                secrets.insert(task.id.clone(), secret);
            }
        }
        Ok(secrets)
    }

    /// One dockerconfigjson Secret per infra credential entry, named by its
    /// position in the list.
    pub async fn image_pull_secrets(
        &self,
        task_group_id: &str,
        infra: &ExecutionInfrastructure,
    ) -> Result<Vec<Secret>> {
        let mut secrets = Vec::with_capacity(infra.image_pull_secrets.len());
        for (index, blob) in infra.image_pull_secrets.iter().enumerate() {
            let owner = format!("image pull secret #{}", index);
            let decrypted = self.decrypt_all(std::slice::from_ref(blob), &owner).await?;
            let docker_config = docker_config_json(&decrypted, &owner)?;

            let data = BTreeMap::from([(
                DOCKER_CONFIG_JSON_KEY.to_string(),
                ByteString(docker_config.expose_secret().as_bytes().to_vec()),
            )]);
            secrets.push(self.secret(
                names::image_pull_secret_name(task_group_id, index),
                task_group_id,
                DOCKER_CONFIG_JSON_TYPE,
                data,
            ));
        }
        debug!(
            "Built {} image pull secrets for task group {}",
            secrets.len(),
            task_group_id
        );
        Ok(secrets)
    }
}

/// Registry credentials either arrive as a ready `.dockerconfigjson` or as
/// registry/username/password keys.
fn docker_config_json(decrypted: &DecryptedSecrets, owner: &str) -> Result<SecretString> {
    if let Some(config) = decrypted.get(DOCKER_CONFIG_JSON_KEY) {
        return Ok(SecretString::from(config.expose_secret().to_string()));
    }

    let field = |key: &str| {
        decrypted.get(key).map(|v| v.expose_secret()).ok_or_else(|| {
            AppError::ConfigurationError(format!(
                "{} carries neither '{}' nor '{}'",
                owner, DOCKER_CONFIG_JSON_KEY, key
            ))
        })
    };
    let registry = field(REGISTRY_KEY)?;
    let username = field(USERNAME_KEY)?;
    let password = field(PASSWORD_KEY)?;

    let auth = Base64::encode_string(format!("{}:{}", username, password).as_bytes());
    let config = json!({
        "auths": {
            registry: {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });
    Ok(SecretString::from(config.to_string()))
}
