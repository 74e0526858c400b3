//! The monitor operations.
//!
//! Every public operation locks the catalog, mutates it, runs the rules
//! engine over the affected group, applies the resulting assignments
//! and appends the matching events - the in-process equivalent of one
//! serializable transaction per operation. Keepers and operators never
//! observe a half-applied decision.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use steward_types::{
    CandidatePriority, Clock, FormationId, GroupId, Health, NodeId, NodeName, NodeState,
    SystemIdentifier, Timestamp,
};
use steward_types::protocol::{
    NodeActiveParams, NodeActiveRow, NodeAddressRow, OtherNodeRow, RegistrationRow,
};

use crate::catalog::{Catalog, Formation, FormationKind, Node};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::events::{Event, EventBus, Notification};
use crate::health::{health_from_probe, HealthProbe};
use crate::rules::{self, RulesOutcome};

// ============================================================================
// Monitor
// ============================================================================

struct State {
    catalog: Catalog,
    bus: EventBus,
}

/// The central authority of a Steward deployment.
pub struct Monitor {
    state: Mutex<State>,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    /// Creates a monitor with an empty catalog.
    pub fn new(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                catalog: Catalog::new(),
                bus: EventBus::new(),
            }),
            config,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned catalog lock means a bug already crashed a thread;
        // keep serving the catalog as it was
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Formation management
    // ========================================================================

    /// Creates a formation. Succeeds quietly if it already exists.
    pub fn create_formation(&self, formation: Formation) {
        let mut state = self.lock();
        if state.catalog.add_formation(formation.clone()) {
            info!(formation = %formation.id, "formation created");
        }
    }

    /// Changes how many synchronous standbys a formation requires, and
    /// tells affected primaries to re-apply their settings.
    pub fn set_formation_number_sync_standbys(
        &self,
        formation_id: &FormationId,
        number_sync_standbys: u32,
    ) -> MonitorResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let formation = state
            .catalog
            .formation_mut(formation_id)
            .ok_or_else(|| MonitorError::UnknownFormation(formation_id.clone()))?;
        formation.number_sync_standbys = number_sync_standbys;

        for group in state.catalog.formation_groups(formation_id) {
            ask_primary_to_apply_settings(&mut state, formation_id, group, now);
            evaluate_group(&mut state, &self.config, formation_id, group, now)?;
        }
        Ok(())
    }

    // ========================================================================
    // Node registration
    // ========================================================================

    /// Registers a new node and places it in its group.
    #[allow(clippy::too_many_arguments)]
    pub fn register_node(
        &self,
        formation_id: &FormationId,
        host: &str,
        port: u16,
        dbname: &str,
        system_identifier: Option<SystemIdentifier>,
        candidate_priority: Option<CandidatePriority>,
        replication_quorum: Option<bool>,
    ) -> MonitorResult<RegistrationRow> {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.catalog.formation(formation_id).is_none() {
            state.catalog.add_formation(Formation::new(formation_id.clone(), dbname));
        }
        let formation = state
            .catalog
            .formation(formation_id)
            .expect("just ensured")
            .clone();

        // plain formations keep everything in group zero; placing nodes
        // across groups is the sharded formations' concern
        let group_id = match formation.kind {
            FormationKind::Plain | FormationKind::Sharded => GroupId::ZERO,
        };

        let peers = state.catalog.group_nodes(formation_id, group_id);
        if !peers.is_empty() && !formation.opt_secondary {
            return Err(MonitorError::SecondariesDisabled(formation_id.clone()));
        }

        let initial_state = if peers.is_empty() {
            NodeState::Single
        } else {
            NodeState::WaitStandby
        };

        // pin the system identifier only when it agrees with the group;
        // a diverging newcomer is re-cloned and pinned on first report
        let group_sysid = peers.iter().find_map(|n| n.system_identifier);
        let pinned = match (system_identifier, group_sysid) {
            (Some(new), Some(existing)) if new != existing => None,
            (new, _) => new,
        };

        let node_id = state.catalog.next_node_id();
        let node = Node {
            node_id,
            node_name: NodeName::for_node(node_id),
            formation_id: formation_id.clone(),
            group_id,
            host: host.to_string(),
            port,
            system_identifier: pinned,
            candidate_priority: candidate_priority.unwrap_or_default(),
            replication_quorum: replication_quorum.unwrap_or(true),
            // the keeper reports init first; only the goal is decided here
            reported_state: NodeState::Init,
            goal_state: initial_state,
            reported_lsn: steward_types::Lsn::INVALID,
            reported_pg_is_running: false,
            reported_replication_state: Default::default(),
            health: Health::Unknown,
            health_checked_at: Timestamp::EPOCH,
            state_changed_at: now,
            reported_at: now,
            lost_at: None,
            wants_maintenance: false,
        };

        let row = RegistrationRow {
            node_id,
            group_id,
            node_name: node.node_name.clone(),
            assigned_state: initial_state,
            candidate_priority: node.candidate_priority,
            replication_quorum: node.replication_quorum,
        };

        info!(node = %node_id, formation = %formation_id, state = %initial_state, "node registered");
        append_event(
            &mut state,
            &node,
            initial_state,
            match initial_state {
                NodeState::Single => "Start as a single node",
                _ => "Start following a primary",
            },
            now,
        );
        state.catalog.insert_node(node);

        evaluate_group(&mut state, &self.config, formation_id, group_id, now)?;
        Ok(row)
    }

    /// Records a node's system identifier.
    pub fn set_node_system_identifier(
        &self,
        node_id: NodeId,
        system_identifier: SystemIdentifier,
    ) -> MonitorResult<NodeAddressRow> {
        let mut state = self.lock();
        let node = state
            .catalog
            .node_mut(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?;
        if let Some(existing) = node.system_identifier {
            if existing != system_identifier {
                return Err(MonitorError::SystemIdentifierMismatch {
                    node: node_id,
                    expected: existing,
                    reported: system_identifier,
                });
            }
        }
        node.system_identifier = Some(system_identifier);
        Ok(NodeAddressRow {
            node_id,
            node_name: node.node_name.clone(),
            host: node.host.clone(),
            port: node.port,
        })
    }

    // ========================================================================
    // node_active - the heartbeat
    // ========================================================================

    /// Processes a keeper's report and returns its assignment.
    pub fn node_active(&self, params: &NodeActiveParams) -> MonitorResult<NodeActiveRow> {
        let now = self.clock.now();
        let mut state = self.lock();

        let node = state
            .catalog
            .node(params.node_id)
            .ok_or(MonitorError::UnknownNode(params.node_id))?;
        if node.formation_id != params.formation || node.group_id != params.group_id {
            return Err(MonitorError::InvalidRequest(format!(
                "node {} belongs to {}/{}, not {}/{}",
                params.node_id, node.formation_id, node.group_id, params.formation, params.group_id
            )));
        }
        let formation_id = node.formation_id.clone();
        let group_id = node.group_id;

        self.check_system_identifier(&mut state, params, now)?;

        // persist the report
        let node = state
            .catalog
            .node_mut(params.node_id)
            .expect("checked above");
        node.reported_state = params.reported_state;
        node.reported_lsn = params.reported_lsn;
        node.reported_pg_is_running = params.pg_is_running;
        node.reported_replication_state = params.replication_state;
        node.reported_at = now;
        node.lost_at = None;

        // a node that finished dropping leaves the catalog here
        if params.reported_state == NodeState::Dropped
            && node.goal_state == NodeState::Dropped
        {
            let node = state
                .catalog
                .delete_node(params.node_id)
                .expect("checked above");
            append_event(&mut state, &node, NodeState::Dropped, "Node has left the formation", now);
            evaluate_group(&mut state, &self.config, &formation_id, group_id, now)?;
            return Ok(NodeActiveRow {
                node_id: params.node_id,
                group_id,
                assigned_state: NodeState::Dropped,
                candidate_priority: node.candidate_priority,
                replication_quorum: node.replication_quorum,
            });
        }

        evaluate_group(&mut state, &self.config, &formation_id, group_id, now)?;

        let node = state
            .catalog
            .node(params.node_id)
            .ok_or(MonitorError::UnknownNode(params.node_id))?;
        Ok(NodeActiveRow {
            node_id: node.node_id,
            group_id: node.group_id,
            assigned_state: node.goal_state,
            candidate_priority: node.candidate_priority,
            replication_quorum: node.replication_quorum,
        })
    }

    /// Verifies the reported system identifier against the group
    /// record, pinning it on first report.
    fn check_system_identifier(
        &self,
        state: &mut State,
        params: &NodeActiveParams,
        now: Timestamp,
    ) -> MonitorResult<()> {
        let Some(reported) = params.system_identifier else {
            return Ok(());
        };
        let node = state
            .catalog
            .node(params.node_id)
            .ok_or(MonitorError::UnknownNode(params.node_id))?;

        let expected = node.system_identifier.or_else(|| {
            state
                .catalog
                .group_nodes(&node.formation_id, node.group_id)
                .iter()
                .filter(|n| n.node_id != params.node_id)
                .find_map(|n| n.system_identifier)
        });

        match expected {
            Some(expected) if expected != reported => {
                let node = node.clone();
                append_event(
                    &mut *state,
                    &node,
                    node.goal_state,
                    "Reported a different system identifier, fencing this node",
                    now,
                );
                warn!(node = %params.node_id, %expected, %reported, "system identifier mismatch");
                Err(MonitorError::SystemIdentifierMismatch {
                    node: params.node_id,
                    expected,
                    reported,
                })
            }
            _ => {
                state
                    .catalog
                    .node_mut(params.node_id)
                    .expect("checked above")
                    .system_identifier = Some(reported);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Node removal and failover
    // ========================================================================

    /// Removes a node from its formation.
    ///
    /// Removing the writable node triggers a failover. With `force` the
    /// record is deleted immediately; otherwise the keeper is told to
    /// drop and the record goes away once it confirms.
    pub fn remove_node(&self, node_id: NodeId, force: bool) -> MonitorResult<bool> {
        let now = self.clock.now();
        let mut state = self.lock();
        let node = state
            .catalog
            .node(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?
            .clone();
        let formation_id = node.formation_id.clone();
        let group_id = node.group_id;
        let was_writable = node.goal_state.is_writable();

        {
            let record = state.catalog.node_mut(node_id).expect("checked above");
            record.goal_state = NodeState::Dropped;
            record.state_changed_at = now;
        }
        append_event(&mut state, &node, NodeState::Dropped, "Node removed by the operator", now);
        notify_state_change(&mut state, &node, NodeState::Dropped);

        if was_writable {
            let mut flags = state.catalog.group_flags(&formation_id, group_id);
            flags.failover_requested = true;
            state.catalog.set_group_flags(&formation_id, group_id, flags);
        }

        if force {
            state.catalog.delete_node(node_id);
        }

        evaluate_group(&mut state, &self.config, &formation_id, group_id, now)?;
        Ok(true)
    }

    /// Asks for a failover of a group.
    ///
    /// Requires a promotion candidate: failing over to nowhere would
    /// only take writes down.
    pub fn perform_failover(
        &self,
        formation_id: Option<&FormationId>,
        group_id: Option<GroupId>,
    ) -> MonitorResult<()> {
        let default_formation = FormationId::default_formation();
        let formation_id = formation_id.unwrap_or(&default_formation);
        let group_id = group_id.unwrap_or(GroupId::ZERO);
        let now = self.clock.now();
        let mut state = self.lock();

        let nodes = state.catalog.group_nodes(formation_id, group_id);
        if nodes.is_empty() {
            return Err(MonitorError::UnknownGroup {
                formation: formation_id.clone(),
                group: group_id,
            });
        }
        let has_candidate = nodes.iter().any(|n| {
            !n.goal_state.is_writable()
                && !n.goal_state.is_dropped()
                && n.candidate_priority.is_candidate()
                && !n.is_lost()
                && !n.wants_maintenance
        });
        if !has_candidate {
            return Err(MonitorError::NoEligibleCandidate {
                formation: formation_id.clone(),
                group: group_id,
            });
        }

        info!(formation = %formation_id, group = %group_id, "failover requested");
        let mut flags = state.catalog.group_flags(formation_id, group_id);
        flags.failover_requested = true;
        state.catalog.set_group_flags(formation_id, group_id, flags);
        state
            .bus
            .notify(&Notification::log(format!(
                "Failover requested for {formation_id}/{group_id}"
            )));

        evaluate_group(&mut state, &self.config, formation_id, group_id, now)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The node currently holding the writable role of a group.
    pub fn get_primary(
        &self,
        formation_id: Option<&FormationId>,
        group_id: Option<GroupId>,
    ) -> MonitorResult<NodeAddressRow> {
        let default_formation = FormationId::default_formation();
        let formation_id = formation_id.unwrap_or(&default_formation);
        let group_id = group_id.unwrap_or(GroupId::ZERO);
        let state = self.lock();

        state
            .catalog
            .group_nodes(formation_id, group_id)
            .into_iter()
            .find(|n| n.goal_state.is_writable())
            .map(|n| NodeAddressRow {
                node_id: n.node_id,
                node_name: n.node_name.clone(),
                host: n.host.clone(),
                port: n.port,
            })
            .ok_or(MonitorError::NoWritableNode)
    }

    /// The other members of a node's group.
    pub fn get_other_nodes(&self, node_id: NodeId) -> MonitorResult<Vec<OtherNodeRow>> {
        let state = self.lock();
        let node = state
            .catalog
            .node(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?;
        Ok(state
            .catalog
            .group_nodes(&node.formation_id, node.group_id)
            .into_iter()
            .filter(|n| n.node_id != node_id && !n.goal_state.is_dropped())
            .map(|n| OtherNodeRow {
                node_id: n.node_id,
                node_name: n.node_name.clone(),
                host: n.host.clone(),
                port: n.port,
                reported_lsn: n.reported_lsn,
                is_primary: n.goal_state.is_writable(),
            })
            .collect())
    }

    /// The last `limit` events, most recent first.
    pub fn get_events(
        &self,
        formation_id: Option<&FormationId>,
        group_id: Option<GroupId>,
        limit: usize,
    ) -> Vec<Event> {
        self.lock().bus.last_events(formation_id, group_id, limit)
    }

    /// The whole event log in append order, for verification tooling.
    pub fn all_events(&self) -> Vec<Event> {
        self.lock().bus.all_events().to_vec()
    }

    /// Subscribes to the notification channels.
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.lock().bus.subscribe()
    }

    /// A copy of one node's catalog record, for observability.
    pub fn node_snapshot(&self, node_id: NodeId) -> Option<Node> {
        self.lock().catalog.node(node_id).cloned()
    }

    /// A copy of a group's membership, for observability.
    pub fn group_snapshot(&self, formation_id: &FormationId, group_id: GroupId) -> Vec<Node> {
        self.lock()
            .catalog
            .group_nodes(formation_id, group_id)
            .into_iter()
            .cloned()
            .collect()
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Puts a node into maintenance.
    ///
    /// On the writable node this first performs a controlled failover;
    /// the node then parks in maintenance once demoted.
    pub fn enable_maintenance(&self, node_id: NodeId) -> MonitorResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let node = state
            .catalog
            .node(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?
            .clone();
        let formation_id = node.formation_id.clone();
        let group_id = node.group_id;

        if node.goal_state.is_writable() {
            let has_candidate = state
                .catalog
                .group_nodes(&formation_id, group_id)
                .iter()
                .any(|n| {
                    n.node_id != node_id
                        && n.candidate_priority.is_candidate()
                        && !n.is_lost()
                        && !n.goal_state.is_dropped()
                });
            if !has_candidate {
                return Err(MonitorError::NoEligibleCandidate {
                    formation: formation_id,
                    group: group_id,
                });
            }
            let mut flags = state.catalog.group_flags(&formation_id, group_id);
            flags.failover_requested = true;
            state.catalog.set_group_flags(&formation_id, group_id, flags);
        } else if !matches!(
            node.goal_state,
            NodeState::Secondary | NodeState::Catchingup | NodeState::WaitStandby
        ) {
            return Err(MonitorError::InvalidRequest(format!(
                "cannot start maintenance from state {}",
                node.goal_state
            )));
        }

        state
            .catalog
            .node_mut(node_id)
            .expect("checked above")
            .wants_maintenance = true;
        evaluate_group(&mut state, &self.config, &formation_id, group_id, now)
    }

    /// Brings a node back from maintenance.
    pub fn disable_maintenance(&self, node_id: NodeId) -> MonitorResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let node = state
            .catalog
            .node_mut(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?;
        node.wants_maintenance = false;
        let formation_id = node.formation_id.clone();
        let group_id = node.group_id;
        evaluate_group(&mut state, &self.config, &formation_id, group_id, now)
    }

    // ========================================================================
    // Replication settings
    // ========================================================================

    /// Updates a node's election priority and quorum participation, and
    /// tells the group's primary to re-apply its settings.
    pub fn set_node_replication_properties(
        &self,
        node_id: NodeId,
        candidate_priority: Option<CandidatePriority>,
        replication_quorum: Option<bool>,
    ) -> MonitorResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let node = state
            .catalog
            .node_mut(node_id)
            .ok_or(MonitorError::UnknownNode(node_id))?;
        if let Some(priority) = candidate_priority {
            node.candidate_priority = priority;
        }
        if let Some(quorum) = replication_quorum {
            node.replication_quorum = quorum;
        }
        let formation_id = node.formation_id.clone();
        let group_id = node.group_id;

        ask_primary_to_apply_settings(&mut state, &formation_id, group_id, now);
        evaluate_group(&mut state, &self.config, &formation_id, group_id, now)
    }

    // ========================================================================
    // Health checks
    // ========================================================================

    /// Runs the independent health probe over every node and feeds the
    /// results into the rules engine.
    pub fn check_nodes_health(&self, probe: &dyn HealthProbe) -> MonitorResult<()> {
        let targets: Vec<(NodeId, String, u16)> = {
            let state = self.lock();
            state
                .catalog
                .nodes()
                .filter(|n| !n.goal_state.is_dropped())
                .map(|n| (n.node_id, n.host.clone(), n.port))
                .collect()
        };

        // probing happens outside the lock; a slow node must not stall
        // the whole monitor
        let results: Vec<(NodeId, bool)> = targets
            .iter()
            .map(|(id, host, port)| (*id, probe.probe(*id, host, *port)))
            .collect();

        let now = self.clock.now();
        let mut state = self.lock();
        let mut groups = Vec::new();
        for (node_id, reachable) in results {
            let Some(node) = state.catalog.node_mut(node_id) else {
                continue; // removed while we probed
            };
            let health = health_from_probe(reachable);
            let changed = node.health != health;
            node.health = health;
            // only an answered probe counts as contact; otherwise a
            // dead node would never cross the silence threshold
            if reachable {
                node.health_checked_at = now;
            }
            let node = node.clone();
            if changed {
                info!(node = %node_id, %health, "node health changed");
                append_event(
                    &mut state,
                    &node,
                    node.goal_state,
                    if reachable {
                        "Node is healthy again"
                    } else {
                        "Node is failing its health checks"
                    },
                    now,
                );
            }
            if !groups.contains(&(node.formation_id.clone(), node.group_id)) {
                groups.push((node.formation_id.clone(), node.group_id));
            }
        }

        for (formation_id, group_id) in groups {
            evaluate_group(&mut state, &self.config, &formation_id, group_id, now)?;
        }
        Ok(())
    }
}

// ============================================================================
// Shared helpers (free functions over the locked state)
// ============================================================================

/// Runs the rules engine for one group and applies its outcome.
fn evaluate_group(
    state: &mut State,
    config: &MonitorConfig,
    formation_id: &FormationId,
    group_id: GroupId,
    now: Timestamp,
) -> MonitorResult<()> {
    let Some(formation) = state.catalog.formation(formation_id).cloned() else {
        return Ok(()); // nothing registered here yet
    };
    let nodes: Vec<Node> = state
        .catalog
        .group_nodes(formation_id, group_id)
        .into_iter()
        .cloned()
        .collect();
    if nodes.is_empty() {
        return Ok(());
    }
    let flags = state.catalog.group_flags(formation_id, group_id);

    let outcome = rules::evaluate(&formation, &nodes, flags, config, now);
    apply_outcome(state, formation_id, group_id, &nodes, outcome, now)
}

/// Persists a rules outcome: lost marks, goal changes, events and
/// notifications. Refuses an outcome that would leave two writable
/// goals in the group.
fn apply_outcome(
    state: &mut State,
    formation_id: &FormationId,
    group_id: GroupId,
    snapshot: &[Node],
    outcome: RulesOutcome,
    now: Timestamp,
) -> MonitorResult<()> {
    // the one-writable-node invariant holds after every transaction;
    // an outcome that would break it is a rules bug and is refused
    let writable_after = snapshot
        .iter()
        .filter(|n| !n.goal_state.is_dropped())
        .map(|n| {
            outcome
                .assignments
                .iter()
                .find(|a| a.node_id == n.node_id)
                .map(|a| a.goal)
                .unwrap_or(n.goal_state)
        })
        .filter(|goal| goal.is_writable())
        .count();
    if writable_after > 1 {
        return Err(MonitorError::InvariantViolation(format!(
            "{writable_after} nodes of {formation_id}/{group_id} would hold a writable goal"
        )));
    }

    for node_id in &outcome.newly_lost {
        if let Some(node) = state.catalog.node_mut(*node_id) {
            node.lost_at = Some(now);
            let node = node.clone();
            warn!(node = %node_id, "node declared lost");
            append_event(
                state,
                &node,
                node.goal_state,
                "Node has been silent past the network partition timeout",
                now,
            );
        }
    }

    for assignment in &outcome.assignments {
        let Some(node) = state.catalog.node_mut(assignment.node_id) else {
            continue;
        };
        node.goal_state = assignment.goal;
        node.state_changed_at = now;
        let node = node.clone();
        info!(
            node = %node.node_id,
            from = %node.reported_state,
            to = %assignment.goal,
            "{}", assignment.reason
        );
        append_event(state, &node, assignment.goal, assignment.reason, now);
        notify_state_change(state, &node, assignment.goal);
    }

    state.catalog.set_group_flags(formation_id, group_id, outcome.flags);
    Ok(())
}

/// Tells a group's primary to re-apply replication settings, when it is
/// currently a full primary.
fn ask_primary_to_apply_settings(
    state: &mut State,
    formation_id: &FormationId,
    group_id: GroupId,
    now: Timestamp,
) {
    let primary = state
        .catalog
        .group_nodes(formation_id, group_id)
        .into_iter()
        .find(|n| n.goal_state == NodeState::Primary)
        .map(|n| n.node_id);
    if let Some(primary_id) = primary {
        if let Some(node) = state.catalog.node_mut(primary_id) {
            node.goal_state = NodeState::ApplySettings;
            node.state_changed_at = now;
            let node = node.clone();
            append_event(
                state,
                &node,
                NodeState::ApplySettings,
                "Applying changed replication settings",
                now,
            );
            notify_state_change(state, &node, NodeState::ApplySettings);
        }
    }
}

fn append_event(state: &mut State, node: &Node, goal: NodeState, description: &str, now: Timestamp) {
    state.bus.append(
        now,
        node.formation_id.clone(),
        node.group_id,
        node.node_id,
        node.node_name.clone(),
        node.reported_state,
        goal,
        description,
    );
    state.bus.notify(&Notification::log(format!(
        "{}/{}: {description}",
        node.formation_id, node.node_name
    )));
}

fn notify_state_change(state: &mut State, node: &Node, goal: NodeState) {
    state.bus.notify(&Notification::state_change(
        &node.formation_id,
        node.group_id,
        node.node_id,
        goal,
    ));
}
