//! Per-task port allocation
//!
//! Each task container talks to the lite-engine over loopback on its own
//! port. One allocator lives for exactly one provisioning pass.

use std::collections::HashMap;

/// Port the lite-engine sidecar listens on
pub const RESERVED_LE_PORT: i32 = 20001;
/// First port handed to a task container
pub const RESERVED_ADDON_PORT: i32 = 20002;

#[derive(Debug)]
pub struct PortAllocator {
    next_port: i32,
    assigned: HashMap<String, i32>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(RESERVED_ADDON_PORT)
    }
}

impl PortAllocator {
    pub fn new(base_port: i32) -> Self {
        Self {
            next_port: base_port,
            assigned: HashMap::new(),
        }
    }

    /// Port for `task_id`; repeated calls with the same id return the same port.
    pub fn port_for(&mut self, task_id: &str) -> i32 {
        if let Some(port) = self.assigned.get(task_id) {
            return *port;
        }
        let port = self.next_port;
        self.next_port += 1;
        self.assigned.insert(task_id.to_string(), port);
        port
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
