//! Container security context resolution

use k8s_openapi::api::core::v1::{Capabilities, SecurityContext};

use crate::domain::entities::SecurityContextSpec;

const PRIVILEGED_IMAGE_PREFIXES: [&str; 5] = [
    "plugins/docker",
    "plugins/ecr",
    "plugins/acr",
    "plugins/gcr",
    "plugins/heroku",
];

const DOCKER_IMAGE_NAME: &str = "docker:";
const DIND_TAG: &str = "dind";

/// Plugin images that build or push images, and docker-in-docker, cannot run
/// unprivileged.
pub fn is_privileged_image(image: &str) -> bool {
    if PRIVILEGED_IMAGE_PREFIXES
        .iter()
        .any(|prefix| image.starts_with(prefix))
    {
        return true;
    }
    image.starts_with(DOCKER_IMAGE_NAME) && image.contains(DIND_TAG)
}

/// Resolve the effective security context for a container running `image`.
///
/// Returns `None` when nothing was declared; the privileged-image heuristic
/// only upgrades a declared context.
pub fn resolve(declared: Option<&SecurityContextSpec>, image: &str) -> Option<SecurityContext> {
    let declared = declared?;

    Some(SecurityContext {
        allow_privilege_escalation: Some(declared.allow_privilege_escalation),
        privileged: Some(declared.privileged || is_privileged_image(image)),
        read_only_root_filesystem: Some(declared.read_only_root_filesystem),
        run_as_non_root: Some(declared.run_as_non_root),
        capabilities: Some(Capabilities {
            add: Some(declared.add_capabilities.clone()),
            drop: Some(declared.drop_capabilities.clone()),
        }),
        // 0 is the "not specified" sentinel
        run_as_user: (declared.run_as_user != 0).then_some(declared.run_as_user),
        run_as_group: (declared.run_as_group != 0).then_some(declared.run_as_group),
        proc_mount: (!declared.proc_mount.is_empty()).then(|| declared.proc_mount.clone()),
        ..Default::default()
    })
}
