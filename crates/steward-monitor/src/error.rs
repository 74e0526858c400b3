//! Monitor error types.
//!
//! Logical errors are part of the monitor's API: callers match on them,
//! so each condition is its own variant with a stable message.

use steward_types::{FormationId, GroupId, NodeId, SystemIdentifier};
use thiserror::Error;

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors returned by monitor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The named formation does not exist.
    #[error("formation {0} is not registered")]
    UnknownFormation(FormationId),

    /// The formation exists but the group does not.
    #[error("group {group} does not exist in formation {formation}")]
    UnknownGroup {
        formation: FormationId,
        group: GroupId,
    },

    /// No node with this id exists.
    #[error("node {0} is not registered")]
    UnknownNode(NodeId),

    /// No node of the group currently holds a writable goal state.
    #[error("group has no writable node right now")]
    NoWritableNode,

    /// A node reported a system identifier different from the one on
    /// record. Fatal for that node.
    #[error("node {node} reported system identifier {reported}, expected {expected}")]
    SystemIdentifierMismatch {
        node: NodeId,
        expected: SystemIdentifier,
        reported: SystemIdentifier,
    },

    /// The formation does not keep standbys; a second node cannot join.
    #[error("formation {0} does not have secondaries enabled")]
    SecondariesDisabled(FormationId),

    /// A failover needs a promotion candidate and none qualifies.
    #[error("no node in group {group} of formation {formation} is eligible for promotion")]
    NoEligibleCandidate {
        formation: FormationId,
        group: GroupId,
    },

    /// The request itself is malformed or not applicable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The rules engine produced an assignment that would break a group
    /// invariant. This is a bug; the operation is refused rather than
    /// applied.
    #[error("refusing assignment that violates group invariant: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_writable_node_has_the_documented_message() {
        assert_eq!(
            MonitorError::NoWritableNode.to_string(),
            "group has no writable node right now"
        );
    }
}
