//! Entity identifiers.
//!
//! All identifiers are newtypes over their wire representation:
//! - [`NodeId`] - monitor-assigned, monotonically increasing
//! - [`GroupId`] - replication group within a formation
//! - [`FormationId`] - named logical cluster
//! - [`NodeName`] - human readable node name, `node_<id>` by default
//! - [`SystemIdentifier`] - the 64-bit identifier of a database cluster
//! - [`CandidatePriority`] - failover election priority, 0-100

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Node Identifier - Copy (8-byte value)
// ============================================================================

/// Unique identifier for a node, assigned by the monitor at registration.
///
/// Node IDs are monotonically increasing and never reused, so the lowest
/// node ID is the oldest member of a group. Election tie-breaks rely on
/// that ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a new node ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the node ID as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next node ID (incremented by 1).
    pub fn next(&self) -> Self {
        NodeId(self.0.saturating_add(1))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// ============================================================================
// Group Identifier - Copy (8-byte value)
// ============================================================================

/// Identifier for a replication group within a formation.
///
/// Plain formations have a single group 0; sharded formations number
/// their groups from 0 upward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GroupId(u64);

impl GroupId {
    /// The first (and for plain formations, only) group.
    pub const ZERO: GroupId = GroupId(0);

    /// Creates a new group ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the group ID as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GroupId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<GroupId> for u64 {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

// ============================================================================
// Formation Identifier - Clone (contains String)
// ============================================================================

/// Name of a formation, the logical cluster a group belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormationId(String);

impl FormationId {
    /// The formation used when none is named explicitly.
    pub const DEFAULT: &'static str = "default";

    /// Creates a new formation ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the default formation ID.
    pub fn default_formation() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Returns the formation name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FormationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FormationId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for FormationId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<FormationId> for String {
    fn from(id: FormationId) -> Self {
        id.0
    }
}

// ============================================================================
// Node Name - Clone (contains String)
// ============================================================================

/// Human readable node name.
///
/// Assigned by the monitor at registration, `node_<id>` unless the
/// operator picked one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeName(String);

impl NodeName {
    /// Creates a node name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives the default name for a node ID: `node_<id>`.
    pub fn for_node(id: NodeId) -> Self {
        Self(format!("node_{id}"))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// ============================================================================
// System Identifier - Copy (8-byte value)
// ============================================================================

/// The 64-bit system identifier of a database cluster.
///
/// All nodes of a group replicate the same cluster and therefore must
/// report the same system identifier once joined. A node reporting a
/// different identifier than the one on record is fenced permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SystemIdentifier(u64);

impl SystemIdentifier {
    /// Creates a system identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the identifier as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SystemIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SystemIdentifier {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<SystemIdentifier> for u64 {
    fn from(id: SystemIdentifier) -> Self {
        id.0
    }
}

// ============================================================================
// Candidate Priority - Copy (1-byte value)
// ============================================================================

/// Maximum candidate priority.
pub const MAX_CANDIDATE_PRIORITY: u8 = 100;

/// Failover election priority of a node, 0 to 100.
///
/// Zero disqualifies the node from promotion entirely. Among candidates
/// with equal LSNs, the highest priority wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidatePriority(u8);

impl CandidatePriority {
    /// A node with priority zero is never promoted.
    pub const NEVER: CandidatePriority = CandidatePriority(0);

    /// Creates a candidate priority, clamped to the 0-100 range.
    pub fn new(priority: u8) -> Self {
        Self(priority.min(MAX_CANDIDATE_PRIORITY))
    }

    /// Returns the priority as a `u8`.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns true if this node may be promoted.
    pub fn is_candidate(&self) -> bool {
        self.0 > 0
    }
}

impl Default for CandidatePriority {
    fn default() -> Self {
        // the out-of-the-box priority every registered node starts with
        Self(50)
    }
}

impl Display for CandidatePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for CandidatePriority {
    fn from(priority: u8) -> Self {
        Self::new(priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_ordering_and_next() {
        let n1 = NodeId::new(1);
        let n2 = NodeId::new(2);
        assert!(n1 < n2);
        assert_eq!(n1.next(), n2);
    }

    #[test]
    fn node_name_default_derivation() {
        assert_eq!(NodeName::for_node(NodeId::new(3)).as_str(), "node_3");
    }

    #[test]
    fn candidate_priority_clamps() {
        assert_eq!(CandidatePriority::new(250).as_u8(), 100);
        assert!(!CandidatePriority::NEVER.is_candidate());
        assert!(CandidatePriority::default().is_candidate());
    }
}
