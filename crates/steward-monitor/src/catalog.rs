//! The monitor catalog: formations, groups and nodes.
//!
//! The catalog is plain data. All mutation happens in
//! [`crate::monitor::Monitor`] under its lock; all decision logic lives
//! in [`crate::rules`]. This module only enforces record-level
//! integrity: monotonic node ids, system-identifier pinning, and group
//! membership lookups.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use steward_types::{
    CandidatePriority, FormationId, GroupId, Health, Lsn, NodeId, NodeName, NodeState,
    ReplicationState, SystemIdentifier, Timestamp,
};

// ============================================================================
// Formation
// ============================================================================

/// The kind of a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormationKind {
    /// One replication group.
    #[default]
    Plain,
    /// Several groups, each its own primary/standby set.
    Sharded,
}

/// A named logical cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formation {
    pub id: FormationId,
    pub kind: FormationKind,
    pub dbname: String,
    /// Whether standbys are kept at all.
    pub opt_secondary: bool,
    /// How many synchronous standbys a primary must retain.
    pub number_sync_standbys: u32,
}

impl Formation {
    /// Creates a plain formation with standbys enabled.
    pub fn new(id: FormationId, dbname: impl Into<String>) -> Self {
        Self {
            id,
            kind: FormationKind::Plain,
            dbname: dbname.into(),
            opt_secondary: true,
            number_sync_standbys: 0,
        }
    }

    /// Sets the number of required synchronous standbys.
    pub fn with_number_sync_standbys(mut self, n: u32) -> Self {
        self.number_sync_standbys = n;
        self
    }

    /// Disables standbys for this formation.
    pub fn without_secondaries(mut self) -> Self {
        self.opt_secondary = false;
        self
    }
}

// ============================================================================
// Node
// ============================================================================

/// One database node as the monitor sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub node_name: NodeName,
    pub formation_id: FormationId,
    pub group_id: GroupId,
    pub host: String,
    pub port: u16,

    /// Pinned on first report; a different value later is fatal.
    pub system_identifier: Option<SystemIdentifier>,
    pub candidate_priority: CandidatePriority,
    pub replication_quorum: bool,

    /// Last state the keeper reported.
    pub reported_state: NodeState,
    /// State the rules engine wants the node in.
    pub goal_state: NodeState,
    pub reported_lsn: Lsn,
    pub reported_pg_is_running: bool,
    pub reported_replication_state: ReplicationState,

    pub health: Health,
    pub health_checked_at: Timestamp,
    pub state_changed_at: Timestamp,
    pub reported_at: Timestamp,

    /// When the lost-node predicate first fired; cleared by a fresh
    /// successful `node_active`.
    pub lost_at: Option<Timestamp>,

    /// The operator asked for maintenance on this node.
    pub wants_maintenance: bool,
}

impl Node {
    /// Returns true if the node has been declared lost and has not
    /// reported back since.
    pub fn is_lost(&self) -> bool {
        self.lost_at.is_some()
    }

    /// The most recent moment the monitor heard anything about this
    /// node, from the keeper or from its own probe.
    pub fn last_contact(&self) -> Timestamp {
        self.reported_at.max(self.health_checked_at)
    }
}

// ============================================================================
// Group flags
// ============================================================================

/// Per-group coordination flags consumed by the rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GroupFlags {
    /// An operator asked for a failover; consumed by the next
    /// evaluation of the group.
    pub failover_requested: bool,
    /// When a failover started; eligibility requires having reported
    /// after this instant. Cleared when the election is decided.
    pub failover_started_at: Option<Timestamp>,
}

// ============================================================================
// Catalog
// ============================================================================

/// The whole catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    formations: BTreeMap<FormationId, Formation>,
    nodes: BTreeMap<NodeId, Node>,
    flags: BTreeMap<(FormationId, GroupId), GroupFlags>,
    last_node_id: NodeId,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Formations
    // ========================================================================

    /// Adds a formation. Replaces nothing: an existing formation with
    /// the same id is left untouched and `false` is returned.
    pub fn add_formation(&mut self, formation: Formation) -> bool {
        match self.formations.entry(formation.id.clone()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(formation);
                true
            }
        }
    }

    /// Looks up a formation.
    pub fn formation(&self, id: &FormationId) -> Option<&Formation> {
        self.formations.get(id)
    }

    /// Looks up a formation mutably.
    pub fn formation_mut(&mut self, id: &FormationId) -> Option<&mut Formation> {
        self.formations.get_mut(id)
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Allocates the next node id. Ids start at 1 and are never reused.
    pub fn next_node_id(&mut self) -> NodeId {
        self.last_node_id = self.last_node_id.next();
        self.last_node_id
    }

    /// Inserts a node record.
    pub fn insert_node(&mut self, node: Node) {
        debug_assert!(
            !self.nodes.contains_key(&node.node_id),
            "node ids are never reused"
        );
        self.nodes.insert(node.node_id, node);
    }

    /// Removes a node record entirely.
    pub fn delete_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Looks up a node mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// All nodes of a group, in node-id order.
    pub fn group_nodes(&self, formation: &FormationId, group: GroupId) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| &n.formation_id == formation && n.group_id == group)
            .collect()
    }

    /// The groups of a formation that currently have members.
    pub fn formation_groups(&self, formation: &FormationId) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self
            .nodes
            .values()
            .filter(|n| &n.formation_id == formation)
            .map(|n| n.group_id)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// Iterates over every node.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterates over every node, mutably.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    // ========================================================================
    // Group flags
    // ========================================================================

    /// The flags of a group (default if never touched).
    pub fn group_flags(&self, formation: &FormationId, group: GroupId) -> GroupFlags {
        self.flags
            .get(&(formation.clone(), group))
            .copied()
            .unwrap_or_default()
    }

    /// Stores the flags of a group.
    pub fn set_group_flags(&mut self, formation: &FormationId, group: GroupId, flags: GroupFlags) {
        self.flags.insert((formation.clone(), group), flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(id: u64, formation: &str, group: u64) -> Node {
        Node {
            node_id: NodeId::new(id),
            node_name: NodeName::for_node(NodeId::new(id)),
            formation_id: FormationId::new(formation),
            group_id: GroupId::new(group),
            host: "localhost".into(),
            port: 5432,
            system_identifier: None,
            candidate_priority: CandidatePriority::default(),
            replication_quorum: true,
            reported_state: NodeState::Init,
            goal_state: NodeState::Init,
            reported_lsn: Lsn::INVALID,
            reported_pg_is_running: false,
            reported_replication_state: ReplicationState::Unknown,
            health: Health::Unknown,
            health_checked_at: Timestamp::EPOCH,
            state_changed_at: Timestamp::EPOCH,
            reported_at: Timestamp::EPOCH,
            lost_at: None,
            wants_maintenance: false,
        }
    }

    #[test]
    fn node_ids_are_monotonic() {
        let mut catalog = Catalog::new();
        assert_eq!(catalog.next_node_id(), NodeId::new(1));
        assert_eq!(catalog.next_node_id(), NodeId::new(2));
    }

    #[test]
    fn group_membership_filters_by_formation_and_group() {
        let mut catalog = Catalog::new();
        catalog.insert_node(test_node(1, "default", 0));
        catalog.insert_node(test_node(2, "default", 0));
        catalog.insert_node(test_node(3, "other", 0));
        catalog.insert_node(test_node(4, "default", 1));

        let group = catalog.group_nodes(&FormationId::new("default"), GroupId::ZERO);
        let ids: Vec<u64> = group.iter().map(|n| n.node_id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2]);

        assert_eq!(
            catalog.formation_groups(&FormationId::new("default")),
            vec![GroupId::new(0), GroupId::new(1)]
        );
    }

    #[test]
    fn add_formation_does_not_replace() {
        let mut catalog = Catalog::new();
        let formation = Formation::new(FormationId::new("default"), "postgres");
        assert!(catalog.add_formation(formation.clone()));
        assert!(!catalog.add_formation(formation.with_number_sync_standbys(2)));
        assert_eq!(
            catalog
                .formation(&FormationId::new("default"))
                .map(|f| f.number_sync_standbys),
            Some(0)
        );
    }

    #[test]
    fn last_contact_is_the_later_of_report_and_probe() {
        let mut node = test_node(1, "default", 0);
        node.reported_at = Timestamp::from_secs(10);
        node.health_checked_at = Timestamp::from_secs(15);
        assert_eq!(node.last_contact(), Timestamp::from_secs(15));
    }
}
