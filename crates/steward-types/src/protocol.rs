//! Keeper/monitor RPC row types.
//!
//! Each monitor operation returns exactly one typed row (or a set of
//! [`OtherNodeRow`]s). These rows, together with the state and id types,
//! are the whole contract between the two sides: the keeper never sees
//! catalog internals and the monitor never sees keeper internals.

use serde::{Deserialize, Serialize};

use crate::ids::{CandidatePriority, FormationId, GroupId, NodeId, NodeName, SystemIdentifier};
use crate::lsn::Lsn;
use crate::state::{NodeState, ReplicationState};

/// Parameters of a `register_node` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParams {
    pub formation: FormationId,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    /// The local cluster's system identifier, when already initialized.
    pub system_identifier: Option<SystemIdentifier>,
    /// Requested election priority; the monitor default applies if absent.
    pub candidate_priority: Option<CandidatePriority>,
    /// Requested quorum participation; defaults to participating.
    pub replication_quorum: Option<bool>,
}

/// Result row of `register_node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRow {
    /// The id the monitor assigned to the new node.
    pub node_id: NodeId,
    /// The group the node was placed in.
    pub group_id: GroupId,
    /// The name the monitor assigned.
    pub node_name: NodeName,
    /// The initial goal state.
    pub assigned_state: NodeState,
    /// The election priority on record.
    pub candidate_priority: CandidatePriority,
    /// Whether the node participates in the synchronous quorum.
    pub replication_quorum: bool,
}

/// Parameters of a `node_active` call, the keeper's heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeActiveParams {
    pub formation: FormationId,
    pub node_id: NodeId,
    pub group_id: GroupId,
    /// The state the keeper most recently reached.
    pub reported_state: NodeState,
    /// The node's current WAL position.
    pub reported_lsn: Lsn,
    /// Whether the local database process is running.
    pub pg_is_running: bool,
    /// The replication sync state observed locally.
    pub replication_state: ReplicationState,
    /// The local cluster's system identifier, when known.
    pub system_identifier: Option<SystemIdentifier>,
}

/// Result row of `node_active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeActiveRow {
    pub node_id: NodeId,
    pub group_id: GroupId,
    /// The goal state the keeper must now converge to.
    pub assigned_state: NodeState,
    /// The election priority on record.
    pub candidate_priority: CandidatePriority,
    /// Whether the node participates in the synchronous quorum.
    pub replication_quorum: bool,
}

/// Result row of `get_primary` and `set_node_system_identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddressRow {
    pub node_id: NodeId,
    pub node_name: NodeName,
    pub host: String,
    pub port: u16,
}

/// One row of `get_other_nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherNodeRow {
    pub node_id: NodeId,
    pub node_name: NodeName,
    pub host: String,
    pub port: u16,
    /// The peer's last reported WAL position.
    pub reported_lsn: Lsn,
    /// Whether the peer currently holds the writable role.
    pub is_primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_active_row_serializes_state_keywords() {
        let row = NodeActiveRow {
            node_id: NodeId::new(1),
            group_id: GroupId::ZERO,
            assigned_state: NodeState::WaitPrimary,
            candidate_priority: CandidatePriority::default(),
            replication_quorum: true,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"wait_primary\""));
    }
}
