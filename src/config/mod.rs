//! Runner-wide configuration
//!
//! Everything the provisioning path needs that is not part of a task group:
//! delegate identity, log-service location, target namespace and the
//! Pod-level defaults. The configuration is passed explicitly into
//! [`crate::infrastructure::runners::litek8s::TaskRunner::new`].

use crate::error::{AppError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
pub const DEFAULT_RUNTIME_CLASS: &str = "gvisor";
pub const DEFAULT_FIELD_MANAGER: &str = "delegate-core";
pub const DEFAULT_DELEGATE_SERVICE_ENDPOINT: &str = "delegate-service";
pub const DEFAULT_DELEGATE_SERVICE_ID: &str = "delegate-grpc-service";
pub const DEFAULT_TASK_PARAMS_FILE: &str = "/etc/delegate/taskfile";

/// What `init` does when the API server rejects the Pod create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PodCreateErrorPolicy {
    /// Return the error to the caller.
    #[default]
    Surface,
    /// Log the error and return normally. Kept for callers that rely on the
    /// legacy fire-and-forget behaviour.
    LogOnly,
}

impl std::str::FromStr for PodCreateErrorPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(PodCreateErrorPolicy::Surface),
            "log-only" | "log_only" | "logonly" => Ok(PodCreateErrorPolicy::LogOnly),
            other => Err(AppError::ConfigurationError(format!(
                "Unknown pod create error policy: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub account_id: String,
    pub delegate_token: String,
    pub log_service_url: String,
    #[serde(default = "default_task_params_file")]
    pub delegate_task_params_file: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_service_account")]
    pub service_account: String,
    #[serde(default = "default_runtime_class")]
    pub runtime_class: String,
    #[serde(default = "default_field_manager")]
    pub field_manager: String,
    #[serde(default = "default_delegate_service_endpoint")]
    pub delegate_service_endpoint: String,
    #[serde(default = "default_delegate_service_id")]
    pub delegate_service_id: String,
    #[serde(default)]
    pub pod_create_error_policy: PodCreateErrorPolicy,
}

fn default_task_params_file() -> String {
    DEFAULT_TASK_PARAMS_FILE.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_service_account() -> String {
    DEFAULT_SERVICE_ACCOUNT.to_string()
}

fn default_runtime_class() -> String {
    DEFAULT_RUNTIME_CLASS.to_string()
}

fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn default_delegate_service_endpoint() -> String {
    DEFAULT_DELEGATE_SERVICE_ENDPOINT.to_string()
}

fn default_delegate_service_id() -> String {
    DEFAULT_DELEGATE_SERVICE_ID.to_string()
}

// The delegate token never shows up in Debug output.
impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("account_id", &self.account_id)
            .field("delegate_token", &"<redacted>")
            .field("log_service_url", &self.log_service_url)
            .field("delegate_task_params_file", &self.delegate_task_params_file)
            .field("namespace", &self.namespace)
            .field("service_account", &self.service_account)
            .field("runtime_class", &self.runtime_class)
            .field("field_manager", &self.field_manager)
            .field("delegate_service_endpoint", &self.delegate_service_endpoint)
            .field("delegate_service_id", &self.delegate_service_id)
            .field("pod_create_error_policy", &self.pod_create_error_policy)
            .finish()
    }
}

impl RunnerConfig {
    /// Build a configuration with the required fields set and every other
    /// field at its default.
    pub fn new(
        account_id: impl Into<String>,
        delegate_token: impl Into<String>,
        log_service_url: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            delegate_token: delegate_token.into(),
            log_service_url: log_service_url.into(),
            delegate_task_params_file: default_task_params_file(),
            namespace: default_namespace(),
            service_account: default_service_account(),
            runtime_class: default_runtime_class(),
            field_manager: default_field_manager(),
            delegate_service_endpoint: default_delegate_service_endpoint(),
            delegate_service_id: default_delegate_service_id(),
            pod_create_error_policy: PodCreateErrorPolicy::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_pod_create_error_policy(mut self, policy: PodCreateErrorPolicy) -> Self {
        self.pod_create_error_policy = policy;
        self
    }

    pub fn from_env() -> Result<Self> {
        match dotenv() {
            Ok(_) => info!("Loaded .env file"),
            Err(_) => debug!("No .env file found, using system environment variables"),
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup. All
    /// missing required variables are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required_vars = ["DELEGATE_ACCOUNT_ID", "DELEGATE_TOKEN", "LOG_SERVICE_URL"];
        let missing_vars: Vec<&str> = required_vars
            .iter()
            .filter(|&&var| lookup(var).map(|v| v.is_empty()).unwrap_or(true))
            .copied()
            .collect();

        if !missing_vars.is_empty() {
            return Err(AppError::ConfigurationError(format!(
                "Missing required environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        let get = |key: &str| lookup(key).unwrap_or_default();
        let mut config = Self::new(
            get("DELEGATE_ACCOUNT_ID"),
            get("DELEGATE_TOKEN"),
            get("LOG_SERVICE_URL"),
        );

        if let Some(value) = lookup("DELEGATE_TASK_PARAMS_FILE") {
            config.delegate_task_params_file = value;
        }
        if let Some(value) = lookup("DELEGATE_NAMESPACE") {
            config.namespace = value;
        }
        if let Some(value) = lookup("DELEGATE_SERVICE_ACCOUNT") {
            config.service_account = value;
        }
        if let Some(value) = lookup("DELEGATE_RUNTIME_CLASS") {
            config.runtime_class = value;
        }
        if let Some(value) = lookup("DELEGATE_FIELD_MANAGER") {
            config.field_manager = value;
        }
        if let Some(value) = lookup("DELEGATE_SERVICE_ENDPOINT") {
            config.delegate_service_endpoint = value;
        }
        if let Some(value) = lookup("DELEGATE_SERVICE_ID") {
            config.delegate_service_id = value;
        }
        if let Some(value) = lookup("DELEGATE_POD_CREATE_ERROR_POLICY") {
            config.pod_create_error_policy = value.parse()?;
        }

        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    /// Load from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: RunnerConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    /// Validate that all required configuration is present and valid
    pub fn validate(&self) -> Result<()> {
        if self.account_id.trim().is_empty() {
            return Err(AppError::ConfigurationError(
                "account id must not be empty".to_string(),
            ));
        }
        if self.delegate_token.is_empty() {
            return Err(AppError::ConfigurationError(
                "delegate token must not be empty".to_string(),
            ));
        }
        Url::parse(&self.log_service_url).map_err(|e| {
            AppError::ConfigurationError(format!(
                "Invalid log service url '{}': {}",
                self.log_service_url, e
            ))
        })?;
        for (field, value) in [
            ("namespace", &self.namespace),
            ("service_account", &self.service_account),
            ("runtime_class", &self.runtime_class),
            ("field_manager", &self.field_manager),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::ConfigurationError(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }

    fn log_summary(&self) {
        info!("Runner configuration loaded:");
        info!("  - Account ID: {}", self.account_id);
        info!("  - Namespace: {}", self.namespace);
        info!("  - Log service: {}", self.log_service_url);
        info!("  - Runtime class: {}", self.runtime_class);
        info!("  - Pod create error policy: {:?}", self.pod_create_error_policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("DELEGATE_ACCOUNT_ID", "acct"),
            ("DELEGATE_TOKEN", "token"),
            ("LOG_SERVICE_URL", "http://log-service:8079"),
        ]))
        .unwrap();

        assert_eq!(config.account_id, "acct");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.service_account, DEFAULT_SERVICE_ACCOUNT);
        assert_eq!(config.runtime_class, DEFAULT_RUNTIME_CLASS);
        assert_eq!(config.field_manager, DEFAULT_FIELD_MANAGER);
        assert_eq!(config.pod_create_error_policy, PodCreateErrorPolicy::Surface);
    }

    #[test]
    fn test_from_lookup_reports_all_missing() {
        let err = RunnerConfig::from_lookup(lookup_from(&[("DELEGATE_TOKEN", "token")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("DELEGATE_ACCOUNT_ID"));
        assert!(message.contains("LOG_SERVICE_URL"));
        assert!(!message.contains("DELEGATE_TOKEN"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("DELEGATE_ACCOUNT_ID", "acct"),
            ("DELEGATE_TOKEN", "token"),
            ("LOG_SERVICE_URL", "https://logs.example.com"),
            ("DELEGATE_NAMESPACE", "ci"),
            ("DELEGATE_POD_CREATE_ERROR_POLICY", "log-only"),
        ]))
        .unwrap();
        assert_eq!(config.namespace, "ci");
        assert_eq!(config.pod_create_error_policy, PodCreateErrorPolicy::LogOnly);
    }

    #[test]
    fn test_invalid_log_service_url() {
        let config = RunnerConfig::new("acct", "token", "not a url");
        assert!(matches!(
            config.validate(),
            Err(AppError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_unknown_policy() {
        assert!("sometimes".parse::<PodCreateErrorPolicy>().is_err());
        assert_eq!(
            "LOG_ONLY".parse::<PodCreateErrorPolicy>().unwrap(),
            PodCreateErrorPolicy::LogOnly
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = RunnerConfig::new("acct", "super-secret-token", "http://logs");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "account_id: acct\ndelegate_token: token\nlog_service_url: http://logs:8079\nnamespace: builds\npod_create_error_policy: log-only"
        )
        .unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "builds");
        assert_eq!(config.runtime_class, DEFAULT_RUNTIME_CLASS);
        assert_eq!(config.pod_create_error_policy, PodCreateErrorPolicy::LogOnly);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"account_id":"acct","delegate_token":"token","log_service_url":"http://logs"}}"#
        )
        .unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.account_id, "acct");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
    }
}
