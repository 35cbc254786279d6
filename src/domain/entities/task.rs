//! Task descriptors
//!
//! A task descriptor is one unit of work inside a task group. The caller
//! builds the list before provisioning; nothing here is persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One unit of work inside a task group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    /// Task identifier, unique within the task group
    pub id: String,
    /// Container runtime for the task
    pub runtime: StepRuntime,
    /// Encrypted secret blobs that become the task's Secret
    #[serde(default)]
    pub input_secrets: Vec<EncryptedSecret>,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, runtime: StepRuntime) -> Self {
        Self {
            id: id.into(),
            runtime,
            input_secrets: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: EncryptedSecret) -> Self {
        self.input_secrets.push(secret);
        self
    }
}

/// Container runtime of a single task
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepRuntime {
    /// Container image
    pub image: String,
    /// Step command. The addon reads it from the task parameters file; it is
    /// not set on the container, whose entrypoint is always the addon.
    #[serde(default)]
    pub command: Vec<String>,
    /// Step arguments, delivered the same way as `command`
    #[serde(default)]
    pub args: Vec<String>,
    /// Task-declared environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Requested cpu and memory
    #[serde(default)]
    pub resource: Option<ResourceSpec>,
    /// Declared security context
    #[serde(default)]
    pub security_context: Option<SecurityContextSpec>,
    /// Working directory, applied only when non-empty
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl StepRuntime {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        self.resource = Some(ResourceSpec::new(cpu, memory));
        self
    }

    pub fn with_security_context(mut self, security_context: SecurityContextSpec) -> Self {
        self.security_context = Some(security_context);
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }
}

/// Symbolic cpu/memory quantities; an empty string means "not set"
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
}

impl ResourceSpec {
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
        }
    }
}

/// Declared container security context.
///
/// `run_as_user` and `run_as_group` use 0 as the "not specified" sentinel and
/// an empty `proc_mount` means the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityContextSpec {
    pub allow_privilege_escalation: bool,
    pub privileged: bool,
    pub read_only_root_filesystem: bool,
    pub run_as_non_root: bool,
    pub run_as_user: i64,
    pub run_as_group: i64,
    pub proc_mount: String,
    pub add_capabilities: Vec<String>,
    pub drop_capabilities: Vec<String>,
}

/// A serialized, encrypted secret bundle as handed over by the manager.
///
/// The content is opaque to everything except the decryptor.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedSecret({} bytes)", self.0.len())
    }
}
