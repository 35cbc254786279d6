//! Deterministic Kubernetes object names
//!
//! Every generated name is a pure function of its input, so provisioning the
//! same task group twice collides on the API server instead of creating a
//! second copy.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Kubernetes DNS-1123 label limit
const MAX_NAME_LENGTH: usize = 63;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "delegate-runner";
pub const TASK_GROUP_LABEL: &str = "delegate.io/task-group";

/// Labels stamped on every object created for a task group
pub fn group_labels(task_group_id: &str) -> BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (
            TASK_GROUP_LABEL.to_string(),
            normalize_resource_name(task_group_id),
        ),
    ]
    .into_iter()
    .collect()
}

/// Lower-case, replace anything outside `[a-z0-9-]` with `-`, trim dashes at
/// both ends and cap the length.
pub fn normalize_resource_name(input: &str) -> String {
    let sanitized: String = input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    let trimmed = sanitized.trim_matches('-');
    let capped: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    capped.trim_end_matches('-').to_string()
}

fn prefixed(prefix: &str, id: &str) -> String {
    let name = format!("{}-{}", prefix, normalize_resource_name(id));
    let capped: String = name.chars().take(MAX_NAME_LENGTH).collect();
    capped.trim_end_matches('-').to_string()
}

/// First five bytes of a SHA-256 over the length-prefixed parts, as hex.
fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..5])
}

/// `base` cut so that `base` + `suffix` fits in one name.
fn with_suffix(base: &str, suffix: &str) -> String {
    let keep = MAX_NAME_LENGTH.saturating_sub(suffix.len());
    let base: String = base.chars().take(keep).collect();
    format!("{}{}", base.trim_end_matches('-'), suffix)
}

/// `{prefix}-{id}{suffix}` while `id` survives normalisation untouched.
/// Otherwise a hash of the raw id goes in front of `suffix`, so two ids that
/// normalise alike still get different names.
fn scoped_name(prefix: &str, id: &str, suffix: &str) -> String {
    let normalized = normalize_resource_name(id);
    let base = format!("{}-{}", prefix, normalized);
    if normalized == id && base.len() + suffix.len() <= MAX_NAME_LENGTH {
        return format!("{}{}", base, suffix);
    }
    with_suffix(&base, &format!("-{}{}", short_hash(&[id]), suffix))
}

pub fn pod_name(task_group_id: &str) -> String {
    scoped_name("pod", task_group_id, "")
}

/// Task ids are only unique inside their group; validation rejects ids that
/// collide after normalisation.
pub fn container_name(task_id: &str) -> String {
    prefixed("task", task_id)
}

/// Task ids repeat across groups, so the name carries both ids and a hash of
/// the pair.
pub fn task_secret_name(task_group_id: &str, task_id: &str) -> String {
    let base = format!(
        "secret-{}-{}",
        normalize_resource_name(task_group_id),
        normalize_resource_name(task_id)
    );
    with_suffix(&base, &format!("-{}", short_hash(&[task_group_id, task_id])))
}

/// Pull secrets are keyed by their position in the infra's secret list.
pub fn image_pull_secret_name(task_group_id: &str, index: usize) -> String {
    scoped_name("image", task_group_id, &format!("-{}", index))
}
