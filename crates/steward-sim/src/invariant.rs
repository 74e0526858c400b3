//! System-wide invariants, checked after every simulation step.
//!
//! A violation panics immediately with the offending snapshot, so a
//! failing scenario points at the exact step that broke the protocol.

use std::collections::BTreeMap;

use steward_monitor::catalog::Node;
use steward_monitor::{Event, EventId};
use steward_types::{Lsn, NodeId, NodeState};

/// Tracks history between checks so per-step invariants can compare
/// against the previous snapshot.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    last_goals: BTreeMap<NodeId, NodeState>,
    last_primary_lsn: BTreeMap<NodeId, Lsn>,
    last_event_id: EventId,
}

impl InvariantChecker {
    /// Creates a checker with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies every invariant against the current snapshot.
    ///
    /// `events` is the full event log in append order.
    ///
    /// # Panics
    ///
    /// Panics on any violation.
    pub fn check(&mut self, nodes: &[Node], events: &[Event]) {
        self.check_single_writable(nodes);
        self.check_reported_primary_has_primary_goal(nodes);
        self.check_events_monotonic(events);
        self.check_goal_changes_have_events(nodes, events);
        self.check_primary_lsn_monotonic(nodes);

        self.last_goals = nodes.iter().map(|n| (n.node_id, n.goal_state)).collect();
        self.last_event_id = events.last().map(|e| e.event_id).unwrap_or(self.last_event_id);
        self.last_primary_lsn = nodes
            .iter()
            .filter(|n| n.reported_state == NodeState::Primary)
            .map(|n| (n.node_id, n.reported_lsn))
            .collect();
    }

    /// No group ever holds two writable goals.
    fn check_single_writable(&self, nodes: &[Node]) {
        let writable: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.goal_state.is_writable())
            .collect();
        assert!(
            writable.len() <= 1,
            "two writable goals in one group: {:?}",
            writable
                .iter()
                .map(|n| (n.node_id, n.goal_state))
                .collect::<Vec<_>>()
        );
    }

    /// A node reporting primary either has a primary-lineage goal or is
    /// being told to step down.
    fn check_reported_primary_has_primary_goal(&self, nodes: &[Node]) {
        for node in nodes {
            if node.reported_state == NodeState::Primary {
                assert!(
                    node.goal_state.is_primary_lineage()
                        || node.goal_state.is_being_demoted()
                        || node.goal_state.is_dropped(),
                    "node {} reports primary with goal {}",
                    node.node_id,
                    node.goal_state
                );
            }
        }
    }

    /// Event ids increase strictly in append order.
    fn check_events_monotonic(&self, events: &[Event]) {
        for window in events.windows(2) {
            assert!(
                window[1].event_id > window[0].event_id,
                "event ids not strictly monotonic: {} then {}",
                window[0].event_id,
                window[1].event_id
            );
        }
    }

    /// Every goal change since the last check left an event.
    fn check_goal_changes_have_events(&self, nodes: &[Node], events: &[Event]) {
        let new_events: Vec<&Event> = events
            .iter()
            .filter(|e| e.event_id > self.last_event_id)
            .collect();
        for node in nodes {
            let Some(&previous) = self.last_goals.get(&node.node_id) else {
                continue; // registration events are checked implicitly
            };
            if previous != node.goal_state {
                assert!(
                    new_events
                        .iter()
                        .any(|e| e.node_id == node.node_id && e.goal_state == node.goal_state),
                    "goal of node {} changed {} -> {} without an event",
                    node.node_id,
                    previous,
                    node.goal_state
                );
            }
        }
    }

    /// A node's reported LSN never moves backwards while it stays
    /// primary.
    fn check_primary_lsn_monotonic(&self, nodes: &[Node]) {
        for node in nodes {
            if node.reported_state != NodeState::Primary {
                continue;
            }
            if let Some(&previous) = self.last_primary_lsn.get(&node.node_id) {
                assert!(
                    node.reported_lsn >= previous,
                    "primary {} reported LSN moved backwards: {} -> {}",
                    node.node_id,
                    previous,
                    node.reported_lsn
                );
            }
        }
    }
}
