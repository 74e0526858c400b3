//! The assignment rules engine.
//!
//! [`evaluate`] is a pure function from one group's snapshot and the
//! current time to the set of goal-state changes the monitor must
//! apply. It never touches the catalog, a clock, or any I/O, so the
//! same snapshot always produces the same assignments and the whole
//! failover protocol can be driven deterministically in tests.
//!
//! The shell ([`crate::monitor::Monitor`]) collects the snapshot,
//! calls `evaluate`, persists the assignments, appends the events and
//! sends the notifications.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use steward_types::{NodeId, NodeState, Timestamp};

use crate::catalog::{Formation, GroupFlags, Node};
use crate::config::MonitorConfig;

// ============================================================================
// Outcome
// ============================================================================

/// One goal-state change for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub node_id: NodeId,
    pub goal: NodeState,
    /// Human readable explanation, recorded in the event log.
    pub reason: &'static str,
}

/// Everything one evaluation decided.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RulesOutcome {
    /// Goal changes to persist, at most one per node.
    pub assignments: Vec<Assignment>,
    /// Nodes that crossed the lost threshold during this evaluation.
    pub newly_lost: Vec<NodeId>,
    /// The group flags after this evaluation.
    pub flags: GroupFlags,
}

// ============================================================================
// Evaluation
// ============================================================================

/// Computes the goal-state changes for one group.
///
/// `nodes` is the group's full membership snapshot, dropped nodes
/// included; `flags` are the group's coordination flags. The outcome
/// contains only real changes: an assignment equal to a node's current
/// goal is never emitted.
pub fn evaluate(
    formation: &Formation,
    nodes: &[Node],
    flags: GroupFlags,
    config: &MonitorConfig,
    now: Timestamp,
) -> RulesOutcome {
    let newly_lost = detect_lost(nodes, config, now);
    let lost: BTreeSet<NodeId> = nodes
        .iter()
        .filter(|n| n.is_lost())
        .map(|n| n.node_id)
        .chain(newly_lost.iter().copied())
        .collect();

    let mut eval = Eval {
        formation,
        nodes,
        flags,
        config,
        now,
        lost,
        proposals: BTreeMap::new(),
    };

    if !eval.singleton_group() {
        eval.failover_trigger();
        eval.election();
        eval.promotion_ladder();
        eval.demotion_ladder();
        eval.rejoin_and_fencing();
        eval.maintenance();
        eval.standby_ladder();
        eval.primary_gate();
    }

    eval.finish(newly_lost)
}

/// Applies the lost-node predicate: silent past the partition timeout
/// with a failed probe. The mark sticks until a fresh `node_active`.
fn detect_lost(nodes: &[Node], config: &MonitorConfig, now: Timestamp) -> Vec<NodeId> {
    nodes
        .iter()
        .filter(|n| !n.is_lost() && !n.goal_state.is_dropped())
        .filter(|n| {
            n.health.is_bad()
                && now.since(n.last_contact()) > config.network_partition_timeout
        })
        .map(|n| n.node_id)
        .collect()
}

struct Eval<'a> {
    formation: &'a Formation,
    nodes: &'a [Node],
    flags: GroupFlags,
    config: &'a MonitorConfig,
    now: Timestamp,
    lost: BTreeSet<NodeId>,
    /// First proposal per node wins; earlier phases take priority.
    proposals: BTreeMap<NodeId, (NodeState, &'static str)>,
}

impl<'a> Eval<'a> {
    // ========================================================================
    // Helpers
    // ========================================================================

    fn propose(&mut self, node: &Node, goal: NodeState, reason: &'static str) {
        self.proposals.entry(node.node_id).or_insert((goal, reason));
    }

    /// Group members, dropped nodes excluded. The iterator borrows the
    /// snapshot, not the evaluation, so proposals can be made while
    /// iterating.
    fn members(&self) -> impl Iterator<Item = &'a Node> {
        let nodes: &'a [Node] = self.nodes;
        nodes.iter().filter(|n| !n.goal_state.is_dropped())
    }

    fn is_lost(&self, node: &Node) -> bool {
        self.lost.contains(&node.node_id)
    }

    /// The node currently holding the writable role, if any.
    fn primary(&self) -> Option<&'a Node> {
        self.members().find(|n| n.goal_state.is_writable())
    }

    fn in_maintenance(node: &Node) -> bool {
        matches!(
            node.goal_state,
            NodeState::WaitMaintenance | NodeState::Maintenance
        )
    }

    // ========================================================================
    // Rule: singleton group
    // ========================================================================

    /// A group of one converges to `single` from anywhere, except a
    /// node parked in maintenance on purpose.
    ///
    /// A pending failover runs first even for a lone survivor: the
    /// election ladder brings it to the writable role, and this rule
    /// settles it into `single` afterwards.
    fn singleton_group(&mut self) -> bool {
        if self.flags.failover_requested || self.flags.failover_started_at.is_some() {
            return false;
        }
        let mut members = self.members();
        let (only, rest) = (members.next(), members.next());
        if rest.is_some() {
            return false;
        }
        let Some(node) = only else {
            return true; // empty group, nothing to decide
        };

        if node.goal_state != NodeState::Single
            && !(node.wants_maintenance && Self::in_maintenance(node))
        {
            let reason = match node.goal_state {
                NodeState::Init => "Start as a single node",
                NodeState::Demoted | NodeState::DemoteTimeout | NodeState::Draining => {
                    "Was demoted after a failure, but secondary was forcibly removed"
                }
                s if s.is_primary_lineage() => "Other node was forcibly removed, now single",
                NodeState::StopReplication => {
                    "Went down to force the primary to time out, but then it was removed"
                }
                _ => "Primary was forcibly removed",
            };
            self.propose(node, NodeState::Single, reason);
        }

        // a lone node has no failover to run
        self.flags = GroupFlags::default();
        true
    }

    // ========================================================================
    // Rule: failover initiation
    // ========================================================================

    fn failover_trigger(&mut self) {
        let primary = self.primary();
        let primary_lost = primary
            .map(|p| self.is_lost(p) && !p.goal_state.is_being_demoted())
            .unwrap_or(false);

        if !(self.flags.failover_requested || primary_lost)
            || self.flags.failover_started_at.is_some()
        {
            return;
        }

        let primary_id = primary.map(|p| p.node_id);
        let peers: Vec<&'a Node> = self
            .members()
            .filter(|n| Some(n.node_id) != primary_id)
            .collect();

        for peer in peers {
            if self.is_lost(peer) || Self::in_maintenance(peer) {
                continue;
            }
            // nodes mid-demotion or that never reported at all sit the
            // election out
            let can_participate = matches!(
                peer.reported_state,
                NodeState::WaitStandby
                    | NodeState::Secondary
                    | NodeState::Catchingup
                    | NodeState::JoinSecondary
                    | NodeState::FastForward
                    | NodeState::ReportLsn
            );
            if !can_participate {
                continue;
            }
            self.propose(
                peer,
                NodeState::ReportLsn,
                "A failover is in progress, reporting the current WAL position",
            );
        }

        if let Some(p) = primary {
            if self.is_lost(p) {
                self.propose(
                    p,
                    NodeState::DemoteTimeout,
                    "A failover occurred, no longer primary",
                );
            } else {
                self.propose(p, NodeState::Draining, "A failover occurred, stopping writes");
            }
        }

        self.flags.failover_requested = false;
        self.flags.failover_started_at = Some(self.now);
    }

    // ========================================================================
    // Rule: LSN election
    // ========================================================================

    /// Decides the election once every eligible candidate has reported
    /// its WAL position since the failover was triggered.
    fn election(&mut self) {
        let Some(started_at) = self.flags.failover_started_at else {
            return;
        };

        let participants: Vec<&'a Node> = self
            .members()
            .filter(|n| n.goal_state == NodeState::ReportLsn)
            .collect();
        if participants.is_empty() {
            return;
        }

        let eligible: Vec<&'a Node> = participants
            .iter()
            .copied()
            .filter(|n| n.candidate_priority.is_candidate() && !self.is_lost(n))
            .collect();
        let all_reported = eligible
            .iter()
            .all(|n| n.reported_state == NodeState::ReportLsn && n.reported_at >= started_at);
        if eligible.is_empty() || !all_reported {
            return;
        }

        // highest LSN wins; ties break on priority, then oldest node
        let winner: &'a Node = eligible
            .iter()
            .copied()
            .max_by_key(|n| (n.reported_lsn, n.candidate_priority, Reverse(n.node_id)))
            .expect("eligible is non-empty");

        self.propose(
            winner,
            NodeState::PreparePromotion,
            "Stop traffic to primary, wait for it to finish draining",
        );

        for loser in participants {
            if loser.node_id == winner.node_id {
                continue;
            }
            if loser.reported_lsn == winner.reported_lsn {
                // not strictly behind the winner: realign first
                self.propose(
                    loser,
                    NodeState::FastForward,
                    "Rewinding to align with the new primary's timeline",
                );
            } else {
                self.propose(
                    loser,
                    NodeState::JoinSecondary,
                    "A new primary has been elected, joining as a standby",
                );
            }
        }

        self.flags.failover_started_at = None;
    }

    // ========================================================================
    // Rule: promotion ladder
    // ========================================================================

    fn promotion_ladder(&mut self) {
        let new_primary_serving = self
            .primary()
            .map(|p| p.reported_state.is_writable() && !self.is_lost(p))
            .unwrap_or(false);

        for node in self.members() {
            match (node.reported_state, node.goal_state) {
                (NodeState::PreparePromotion, NodeState::PreparePromotion) => {
                    self.propose(
                        node,
                        NodeState::StopReplication,
                        "Prevent against split-brain situations",
                    );
                }
                (NodeState::StopReplication, NodeState::StopReplication) => {
                    self.propose(
                        node,
                        NodeState::WaitPrimary,
                        "Confirmed promotion with the monitor",
                    );
                }
                (NodeState::FastForward, NodeState::FastForward) => {
                    self.propose(
                        node,
                        NodeState::JoinSecondary,
                        "Fetched missing WAL, ready to follow the new primary",
                    );
                }
                (NodeState::JoinSecondary, NodeState::JoinSecondary) if new_primary_serving => {
                    self.propose(
                        node,
                        NodeState::Secondary,
                        "Following the new primary",
                    );
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Rule: demotion ladder
    // ========================================================================

    fn demotion_ladder(&mut self) {
        for node in self.members() {
            match (node.reported_state, node.goal_state) {
                (NodeState::Draining, NodeState::Draining) => {
                    self.propose(
                        node,
                        NodeState::DemoteTimeout,
                        "Secondary confirms it's receiving no more writes",
                    );
                }
                (NodeState::Demote, NodeState::Demote) => {
                    self.propose(node, NodeState::Demoted, "Demoted after being fenced");
                }
                (_, NodeState::DemoteTimeout) => {
                    if self.now.since(node.state_changed_at) > self.config.demote_timeout {
                        self.propose(node, NodeState::Demoted, "Demote timeout expired");
                    }
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Rules: rejoin and fencing
    // ========================================================================

    fn rejoin_and_fencing(&mut self) {
        let primary_serving = self
            .primary()
            .map(|p| p.reported_state.is_writable() && !self.is_lost(p))
            .unwrap_or(false);

        for node in self.members() {
            // a demoted node rejoins once someone else serves writes
            if node.goal_state == NodeState::Demoted
                && node.reported_state == NodeState::Demoted
                && primary_serving
            {
                if node.wants_maintenance {
                    self.propose(
                        node,
                        NodeState::WaitMaintenance,
                        "Suspending for manual maintenance after demotion",
                    );
                } else {
                    self.propose(
                        node,
                        NodeState::Catchingup,
                        "A new primary is available. First, try to rewind. If that fails, do a pg_basebackup.",
                    );
                }
                continue;
            }

            // a node acting as primary against its assignment is fenced
            if node.reported_state == NodeState::Primary
                && !node.goal_state.is_primary_lineage()
                && !node.goal_state.is_being_demoted()
            {
                self.propose(
                    node,
                    NodeState::Demote,
                    "Reported primary while assigned another role, fencing",
                );
                continue;
            }

            // a lost secondary has to prove itself again when it returns
            if self.is_lost(node) && node.goal_state == NodeState::Secondary {
                self.propose(
                    node,
                    NodeState::Catchingup,
                    "Failed to report back to the monitor, not eligible for promotion",
                );
            }
        }
    }

    // ========================================================================
    // Rule: maintenance
    // ========================================================================

    fn maintenance(&mut self) {
        for node in self.members() {
            if node.wants_maintenance {
                match node.goal_state {
                    NodeState::Secondary | NodeState::Catchingup => {
                        self.propose(
                            node,
                            NodeState::WaitMaintenance,
                            "Suspending standby for manual maintenance",
                        );
                    }
                    NodeState::WaitMaintenance
                        if node.reported_state == NodeState::WaitMaintenance =>
                    {
                        self.propose(node, NodeState::Maintenance, "Standby is now in maintenance");
                    }
                    _ => {}
                }
            } else if matches!(
                node.goal_state,
                NodeState::WaitMaintenance | NodeState::Maintenance
            ) {
                self.propose(
                    node,
                    NodeState::Catchingup,
                    "Restarting standby after manual maintenance is done",
                );
            }
        }
    }

    // ========================================================================
    // Rules: standby ladder
    // ========================================================================

    fn standby_ladder(&mut self) {
        let Some(primary) = self.primary() else {
            return;
        };
        let primary_ready = matches!(
            primary.goal_state,
            NodeState::WaitPrimary | NodeState::Primary | NodeState::JoinPrimary
        );

        for node in self.members() {
            if node.node_id == primary.node_id {
                continue;
            }
            match (node.reported_state, node.goal_state) {
                (NodeState::WaitStandby, NodeState::WaitStandby) if primary_ready => {
                    self.propose(
                        node,
                        NodeState::Catchingup,
                        "The primary is now ready to accept a standby",
                    );
                }
                (NodeState::Catchingup, NodeState::Catchingup) => {
                    if self.caught_up(node, primary) {
                        self.propose(
                            node,
                            NodeState::Secondary,
                            "Convinced the monitor that I'm up and running, and eligible for promotion again",
                        );
                    }
                }
                (NodeState::Catchingup, NodeState::Secondary) => {
                    // the standby says it fell behind; believe it
                    self.propose(
                        node,
                        NodeState::Catchingup,
                        "Standby fell behind, catching up again",
                    );
                }
                _ => {}
            }
        }
    }

    /// A standby is caught up when its reported position is within the
    /// configured slack of the primary's, and it has reached the
    /// synchronous state the formation requires.
    fn caught_up(&self, standby: &Node, primary: &Node) -> bool {
        if primary.reported_lsn.is_invalid() || standby.reported_lsn.is_invalid() {
            return false;
        }
        let lag = primary.reported_lsn.distance_from(standby.reported_lsn);
        if lag > self.config.catchup_slack_bytes {
            return false;
        }
        self.formation.number_sync_standbys == 0
            || standby.reported_replication_state.is_synchronous()
    }

    // ========================================================================
    // Rules: primary state gate
    // ========================================================================

    fn primary_gate(&mut self) {
        let Some(primary) = self.primary() else {
            return;
        };

        let peers: Vec<&'a Node> = self
            .members()
            .filter(|n| n.node_id != primary.node_id)
            .collect();

        let any_secondaries = peers
            .iter()
            .filter(|n| n.reported_state == NodeState::Secondary && !self.is_lost(n))
            .count();
        let sync_secondaries = peers
            .iter()
            .filter(|n| {
                n.reported_state == NodeState::Secondary
                    && !self.is_lost(n)
                    && n.replication_quorum
            })
            .count();
        let joining = peers.iter().any(|n| {
            matches!(n.goal_state, NodeState::WaitStandby | NodeState::Catchingup)
                && !self.is_lost(n)
        });
        // a newcomer counts from registration on (goal wait_standby),
        // not only once its keeper first reports
        let standby_waiting = peers.iter().any(|n| {
            (n.goal_state == NodeState::WaitStandby || n.reported_state == NodeState::WaitStandby)
                && !self.is_lost(n)
        });

        let required = self.formation.number_sync_standbys as usize;
        let sync_satisfied = any_secondaries >= 1 && sync_secondaries >= required;

        match primary.goal_state {
            NodeState::Single if primary.reported_state == NodeState::Single && standby_waiting => {
                self.propose(primary, NodeState::WaitPrimary, "A new secondary was added");
            }
            NodeState::WaitPrimary => {
                let reached = matches!(
                    primary.reported_state,
                    NodeState::WaitPrimary | NodeState::Primary
                );
                if reached && sync_satisfied && !joining {
                    self.propose(primary, NodeState::Primary, "A healthy secondary appeared");
                }
            }
            NodeState::Primary => {
                if standby_waiting {
                    // suspend sync fencing while the newcomer clones
                    self.propose(primary, NodeState::JoinPrimary, "A new standby is joining");
                } else if !sync_satisfied {
                    self.propose(primary, NodeState::WaitPrimary, "Secondary became unhealthy");
                }
            }
            NodeState::JoinPrimary => {
                if !joining && !standby_waiting {
                    if sync_satisfied {
                        self.propose(primary, NodeState::Primary, "Standby joined the group");
                    } else {
                        self.propose(
                            primary,
                            NodeState::WaitPrimary,
                            "Standby went away while joining",
                        );
                    }
                }
            }
            NodeState::ApplySettings if primary.reported_state == NodeState::ApplySettings => {
                if sync_satisfied {
                    self.propose(primary, NodeState::Primary, "Replication settings applied");
                } else {
                    self.propose(
                        primary,
                        NodeState::WaitPrimary,
                        "Replication settings applied",
                    );
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    fn finish(self, newly_lost: Vec<NodeId>) -> RulesOutcome {
        let goals: BTreeMap<NodeId, NodeState> = self
            .nodes
            .iter()
            .map(|n| (n.node_id, n.goal_state))
            .collect();

        let assignments = self
            .proposals
            .into_iter()
            .filter(|(id, (goal, _))| goals.get(id) != Some(goal))
            .map(|(node_id, (goal, reason))| Assignment {
                node_id,
                goal,
                reason,
            })
            .collect();

        RulesOutcome {
            assignments,
            newly_lost,
            flags: self.flags,
        }
    }
}
