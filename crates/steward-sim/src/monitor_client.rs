//! The keeper's monitor handle, wired to an in-process monitor.

use std::sync::Arc;

use steward_keeper::{KeeperError, KeeperResult, MonitorClient};
use steward_monitor::{Monitor, MonitorError};
use steward_types::protocol::{
    NodeActiveParams, NodeActiveRow, NodeAddressRow, OtherNodeRow, RegisterParams, RegistrationRow,
};
use steward_types::{FormationId, GroupId, NodeId};

/// Calls monitor operations directly, translating the monitor's named
/// errors into the keeper's error classification.
pub struct InProcessMonitorClient {
    monitor: Arc<Monitor>,
    formation: FormationId,
    group_id: GroupId,
}

impl InProcessMonitorClient {
    /// Creates a client for one formation and group.
    pub fn new(monitor: Arc<Monitor>, formation: FormationId, group_id: GroupId) -> Self {
        Self {
            monitor,
            formation,
            group_id,
        }
    }

    fn map_error(err: MonitorError) -> KeeperError {
        match err {
            MonitorError::SystemIdentifierMismatch {
                expected, reported, ..
            } => KeeperError::SystemIdentifierChanged {
                expected,
                actual: reported,
            },
            other => KeeperError::MonitorLogical(other.to_string()),
        }
    }
}

impl MonitorClient for InProcessMonitorClient {
    fn register_node(&mut self, params: &RegisterParams) -> KeeperResult<RegistrationRow> {
        self.monitor
            .register_node(
                &params.formation,
                &params.host,
                params.port,
                &params.dbname,
                params.system_identifier,
                params.candidate_priority,
                params.replication_quorum,
            )
            .map_err(Self::map_error)
    }

    fn node_active(&mut self, params: &NodeActiveParams) -> KeeperResult<NodeActiveRow> {
        self.monitor.node_active(params).map_err(Self::map_error)
    }

    fn get_primary(&mut self) -> KeeperResult<NodeAddressRow> {
        self.monitor
            .get_primary(Some(&self.formation), Some(self.group_id))
            .map_err(Self::map_error)
    }

    fn get_other_nodes(&mut self, node_id: NodeId) -> KeeperResult<Vec<OtherNodeRow>> {
        self.monitor.get_other_nodes(node_id).map_err(Self::map_error)
    }
}
