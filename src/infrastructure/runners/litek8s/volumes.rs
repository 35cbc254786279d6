//! Shared Pod volumes
//!
//! The addon volume carries the binaries the init container installs; the
//! workspace volume carries work products. Both are mounted at the same path
//! everywhere so the sidecar sees what any task container wrote.

use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, Volume, VolumeMount};

use super::resources::parse_quantity;
use crate::domain::entities::StorageResource;
use crate::error::{AppError, Result};

pub const ADDON_VOLUME_NAME: &str = "addon";
pub const ADDON_MOUNT_PATH: &str = "/addon";
pub const WORKSPACE_VOLUME_NAME: &str = "harness";
pub const WORKSPACE_MOUNT_PATH: &str = "/harness";

/// Volumes of one task group and where each container shape mounts them
#[derive(Debug, Clone, PartialEq)]
pub struct VolumePlan {
    pub volumes: Vec<Volume>,
    addon_mount: VolumeMount,
    workspace_mount: VolumeMount,
    storage_mounts: Vec<VolumeMount>,
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

impl VolumePlan {
    /// The two shared volumes plus one `emptyDir` per declared storage
    /// resource.
    pub fn plan(storage: &[StorageResource]) -> Result<Self> {
        let mut volumes = vec![
            empty_dir(ADDON_VOLUME_NAME),
            empty_dir(WORKSPACE_VOLUME_NAME),
        ];
        let mut storage_mounts = Vec::with_capacity(storage.len());

        for resource in storage {
            let reserved_name = volumes.iter().any(|v| v.name == resource.name);
            if reserved_name {
                return Err(AppError::ConfigurationError(format!(
                    "storage volume name '{}' is already in use",
                    resource.name
                )));
            }
            let reserved_path = resource.mount_path == ADDON_MOUNT_PATH
                || resource.mount_path == WORKSPACE_MOUNT_PATH
                || storage_mounts
                    .iter()
                    .any(|m: &VolumeMount| m.mount_path == resource.mount_path);
            if reserved_path {
                return Err(AppError::ConfigurationError(format!(
                    "storage mount path '{}' is already in use",
                    resource.mount_path
                )));
            }

            let size_limit = resource
                .size_limit
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(parse_quantity)
                .transpose()?;

            volumes.push(Volume {
                name: resource.name.clone(),
                empty_dir: Some(EmptyDirVolumeSource {
                    medium: resource.medium.clone().filter(|m| !m.is_empty()),
                    size_limit,
                }),
                ..Default::default()
            });
            storage_mounts.push(mount(&resource.name, &resource.mount_path));
        }

        Ok(Self {
            volumes,
            addon_mount: mount(ADDON_VOLUME_NAME, ADDON_MOUNT_PATH),
            workspace_mount: mount(WORKSPACE_VOLUME_NAME, WORKSPACE_MOUNT_PATH),
            storage_mounts,
        })
    }

    /// Mounts for task containers and the lite-engine
    pub fn shared_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![self.addon_mount.clone(), self.workspace_mount.clone()];
        mounts.extend(self.storage_mounts.iter().cloned());
        mounts
    }

    /// Mounts for the addon init container
    pub fn addon_mounts(&self) -> Vec<VolumeMount> {
        vec![self.addon_mount.clone()]
    }
}
