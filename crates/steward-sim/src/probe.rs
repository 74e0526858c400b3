//! The scripted health probe.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use steward_monitor::HealthProbe;
use steward_types::NodeId;

/// A probe the test flips per node. Everything answers by default.
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    down: Arc<Mutex<BTreeSet<NodeId>>>,
}

impl SimProbe {
    /// Creates a probe with every node answering.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a node stop answering probes.
    pub fn take_down(&self, node_id: NodeId) {
        self.down.lock().expect("probe lock").insert(node_id);
    }

    /// Makes a node answer probes again.
    pub fn bring_up(&self, node_id: NodeId) {
        self.down.lock().expect("probe lock").remove(&node_id);
    }
}

impl HealthProbe for SimProbe {
    fn probe(&self, node_id: NodeId, _host: &str, _port: u16) -> bool {
        !self.down.lock().expect("probe lock").contains(&node_id)
    }
}
