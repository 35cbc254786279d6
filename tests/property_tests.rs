//! Property-based tests for task-group Pod assembly
//!
//! Whatever the task list looks like, a planned Pod keeps its shape: one
//! container per task plus the lite-engine, one init container, and one port
//! per task that never collides with the lite-engine port.

mod common;

use common::*;
use delegate_k8s_runner::{StepRuntime, TaskDescriptor};
use proptest::prelude::*;
use std::collections::HashSet;

/// Distinct task ids that stay distinct after name normalization
fn arb_task_ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z][a-z0-9]{0,12}", 1..12)
        .prop_map(|ids| ids.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: N tasks yield N + 1 containers, one init container and N
    /// distinct task ports starting at 20002
    #[test]
    fn prop_pod_shape_follows_task_list(ids in arb_task_ids()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let harness = Harness::new();
        let tasks: Vec<_> = ids
            .iter()
            .map(|id| TaskDescriptor::new(id.as_str(), StepRuntime::new("alpine")))
            .collect();

        let plan = runtime
            .block_on(harness.runner.plan("group", &tasks, &wire(&test_infra())))
            .unwrap();
        let spec = plan.pod.spec.unwrap();

        prop_assert_eq!(spec.containers.len(), tasks.len() + 1);
        prop_assert_eq!(spec.init_containers.unwrap().len(), 1);
        prop_assert_eq!(spec.containers.last().unwrap().name.as_str(), "lite-engine");

        let ports: HashSet<i32> = spec.containers[..tasks.len()]
            .iter()
            .map(|c| c.ports.as_ref().unwrap()[0].container_port)
            .collect();
        prop_assert_eq!(ports.len(), tasks.len());
        prop_assert!(ports.iter().all(|p| *p >= 20002));
        prop_assert_eq!(*ports.iter().max().unwrap(), 20001 + tasks.len() as i32);
    }
}
