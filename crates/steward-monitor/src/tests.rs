//! Integration tests for the monitor.
//!
//! These drive the public operations the way keepers and operators do,
//! with a manual clock so every timeout decision is deterministic.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steward_types::protocol::NodeActiveParams;
use steward_types::{
    CandidatePriority, Clock, FormationId, GroupId, Health, Lsn, NodeId, NodeName, NodeState,
    ReplicationState, SystemIdentifier, Timestamp,
};

use crate::catalog::{Formation, GroupFlags, Node};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::monitor::Monitor;
use crate::rules;

// ============================================================================
// Helpers
// ============================================================================

/// A clock the tests advance by hand.
struct TestClock(AtomicU64);

impl TestClock {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(1_000_000_000)))
    }

    fn advance(&self, delta: Duration) {
        self.0
            .fetch_add(u64::try_from(delta.as_nanos()).unwrap(), Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.0.load(Ordering::SeqCst))
    }
}

fn monitor() -> (Monitor, Arc<TestClock>) {
    let clock = TestClock::new();
    (
        Monitor::new(MonitorConfig::production(), clock.clone()),
        clock,
    )
}

fn default_formation() -> FormationId {
    FormationId::default_formation()
}

fn lsn(text: &str) -> Lsn {
    Lsn::from_str(text).unwrap()
}

fn active_params(formation: &str, node_id: u64, state: NodeState, at: &str) -> NodeActiveParams {
    NodeActiveParams {
        formation: FormationId::new(formation),
        node_id: NodeId::new(node_id),
        group_id: GroupId::ZERO,
        reported_state: state,
        reported_lsn: lsn(at),
        pg_is_running: true,
        replication_state: ReplicationState::Sync,
        system_identifier: None,
    }
}

fn register(monitor: &Monitor, port: u16, priority: Option<u8>) -> steward_types::protocol::RegistrationRow {
    monitor
        .register_node(
            &default_formation(),
            "localhost",
            port,
            "postgres",
            None,
            priority.map(CandidatePriority::new),
            None,
        )
        .unwrap()
}

// ============================================================================
// Scenario A: join a single-node formation
// ============================================================================

#[test]
fn joining_a_single_node_formation() {
    let (monitor, clock) = monitor();

    let r1 = register(&monitor, 9876, None);
    assert_eq!(r1.node_id, NodeId::new(1));
    assert_eq!(r1.node_name, NodeName::new("node_1"));
    assert_eq!(r1.assigned_state, NodeState::Single);

    clock.advance(Duration::from_secs(1));
    let row = monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::Single);

    let r2 = register(&monitor, 9877, None);
    assert_eq!(r2.node_id, NodeId::new(2));
    assert_eq!(r2.assigned_state, NodeState::WaitStandby);

    clock.advance(Duration::from_secs(1));
    let row = monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::WaitPrimary);

    let row = monitor
        .node_active(&active_params("default", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::Catchingup);
}

// ============================================================================
// Scenario B: remove the primary with no standby ready
// ============================================================================

#[test]
fn removing_the_primary_before_the_standby_is_ready() {
    let (monitor, clock) = monitor();
    register(&monitor, 9876, None);
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    register(&monitor, 9877, None);
    monitor
        .node_active(&active_params("default", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();

    clock.advance(Duration::from_secs(1));
    assert!(monitor.remove_node(NodeId::new(1), false).unwrap());

    assert_eq!(
        monitor.get_primary(None, None),
        Err(MonitorError::NoWritableNode)
    );
    assert_eq!(
        monitor.get_primary(None, None).unwrap_err().to_string(),
        "group has no writable node right now"
    );

    let node2 = monitor.node_snapshot(NodeId::new(2)).unwrap();
    assert_eq!(node2.goal_state, NodeState::ReportLsn);

    // the lone survivor wins the election and ends up writable
    clock.advance(Duration::from_secs(1));
    let row = monitor
        .node_active(&active_params("default", 2, NodeState::ReportLsn, "0/1000"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::PreparePromotion);
    let row = monitor
        .node_active(&active_params(
            "default",
            2,
            NodeState::PreparePromotion,
            "0/1000",
        ))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::StopReplication);
    let row = monitor
        .node_active(&active_params(
            "default",
            2,
            NodeState::StopReplication,
            "0/1000",
        ))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::WaitPrimary);
    let row = monitor
        .node_active(&active_params("default", 2, NodeState::WaitPrimary, "0/1000"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::Single);
}

// ============================================================================
// Scenario C: LSN election with tie break on priority
// ============================================================================

/// Drives a three node group to primary + two secondaries.
fn three_node_group(monitor: &Monitor, clock: &TestClock) {
    register(monitor, 9876, None);
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();

    register(monitor, 9877, Some(100));
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 1, NodeState::WaitPrimary, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::Catchingup, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::Secondary, "0/1000"))
        .unwrap();
    clock.advance(Duration::from_secs(1));

    register(monitor, 9878, Some(50));
    monitor
        .node_active(&active_params("default", 3, NodeState::WaitStandby, "0/0"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 3, NodeState::Catchingup, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 3, NodeState::Secondary, "0/1000"))
        .unwrap();
    // the primary acknowledges its post-join state
    let row = monitor
        .node_active(&active_params("default", 1, NodeState::Primary, "0/1000"))
        .unwrap();
    assert!(row.assigned_state.is_writable());
}

#[test]
fn election_prefers_the_higher_priority_on_equal_lsn() {
    let (monitor, clock) = monitor();
    three_node_group(&monitor, &clock);

    clock.advance(Duration::from_secs(1));
    monitor.perform_failover(None, None).unwrap();

    assert_eq!(
        monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state,
        NodeState::ReportLsn
    );
    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::ReportLsn
    );
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::Draining
    );

    clock.advance(Duration::from_secs(1));
    monitor
        .node_active(&active_params("default", 2, NodeState::ReportLsn, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 3, NodeState::ReportLsn, "0/1000"))
        .unwrap();

    // equal LSNs: priority 100 beats priority 50
    assert_eq!(
        monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state,
        NodeState::PreparePromotion
    );
    // the loser is not strictly behind, so it realigns first
    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::FastForward
    );
}

#[test]
fn election_prefers_the_higher_lsn_over_priority() {
    let (monitor, clock) = monitor();
    three_node_group(&monitor, &clock);

    clock.advance(Duration::from_secs(1));
    monitor.perform_failover(None, None).unwrap();
    clock.advance(Duration::from_secs(1));

    // node 3 (priority 50) is ahead of node 2 (priority 100)
    monitor
        .node_active(&active_params("default", 2, NodeState::ReportLsn, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 3, NodeState::ReportLsn, "0/2000"))
        .unwrap();

    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::PreparePromotion
    );
    assert_eq!(
        monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state,
        NodeState::JoinSecondary
    );
}

// ============================================================================
// Scenario D: system identifier fence
// ============================================================================

#[test]
fn a_changed_system_identifier_is_fatal_for_the_node() {
    let (monitor, _clock) = monitor();
    register(&monitor, 9876, None);
    register(&monitor, 9877, None);

    let mut params = active_params("default", 2, NodeState::WaitStandby, "0/0");
    params.system_identifier = Some(SystemIdentifier::new(7_000_000_001));
    monitor.node_active(&params).unwrap();

    let goal_before = monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state;

    let mut params = active_params("default", 2, NodeState::Catchingup, "0/0");
    params.system_identifier = Some(SystemIdentifier::new(7_000_000_002));
    let err = monitor.node_active(&params).unwrap_err();
    assert!(matches!(
        err,
        MonitorError::SystemIdentifierMismatch {
            node,
            ..
        } if node == NodeId::new(2)
    ));

    // the rejected report must not have moved the node
    let node2 = monitor.node_snapshot(NodeId::new(2)).unwrap();
    assert_eq!(node2.goal_state, goal_before);
    assert_eq!(
        node2.system_identifier,
        Some(SystemIdentifier::new(7_000_000_001))
    );
}

#[test]
fn formations_without_secondaries_refuse_a_second_node() {
    let (monitor, _clock) = monitor();
    let formation = FormationId::new("solo");
    monitor.create_formation(Formation::new(formation.clone(), "postgres").without_secondaries());

    monitor
        .register_node(&formation, "localhost", 9876, "postgres", None, None, None)
        .unwrap();
    let err = monitor
        .register_node(&formation, "localhost", 9877, "postgres", None, None, None)
        .unwrap_err();
    assert!(matches!(err, MonitorError::SecondariesDisabled(_)));
}

#[test]
fn set_node_system_identifier_pins_once() {
    let (monitor, _clock) = monitor();
    register(&monitor, 9876, None);

    let row = monitor
        .set_node_system_identifier(NodeId::new(1), SystemIdentifier::new(99))
        .unwrap();
    assert_eq!(row.node_name, NodeName::new("node_1"));
    assert_eq!(row.port, 9876);

    // idempotent for the same value, an error for a different one
    assert!(monitor
        .set_node_system_identifier(NodeId::new(1), SystemIdentifier::new(99))
        .is_ok());
    assert!(monitor
        .set_node_system_identifier(NodeId::new(1), SystemIdentifier::new(100))
        .is_err());
}

#[test]
fn the_group_shares_one_system_identifier() {
    let (monitor, _clock) = monitor();
    register(&monitor, 9876, None);
    register(&monitor, 9877, None);

    let mut params = active_params("default", 1, NodeState::Single, "0/1000");
    params.system_identifier = Some(SystemIdentifier::new(41));
    monitor.node_active(&params).unwrap();

    // node 2 never reported before, but the group already has a sysid
    let mut params = active_params("default", 2, NodeState::WaitStandby, "0/0");
    params.system_identifier = Some(SystemIdentifier::new(42));
    assert!(monitor.node_active(&params).is_err());
}

// ============================================================================
// Scenario E: synchronous standby count gate
// ============================================================================

#[test]
fn sync_standby_count_gates_the_primary_state() {
    let (monitor, _clock) = monitor();
    let formation = FormationId::new("syncy");
    let mut definition = Formation::new(formation.clone(), "postgres");
    definition.number_sync_standbys = 1;
    monitor.create_formation(definition);

    monitor
        .register_node(&formation, "localhost", 9876, "postgres", None, None, None)
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 1, NodeState::Single, "0/2000"))
        .unwrap();
    monitor
        .register_node(&formation, "localhost", 9877, "postgres", None, None, None)
        .unwrap();

    // with no secondary ready yet, the primary gets wait_primary
    let row = monitor
        .node_active(&active_params("syncy", 1, NodeState::Single, "0/2000"))
        .unwrap();
    assert_eq!(row.assigned_state, NodeState::WaitPrimary);

    monitor
        .node_active(&active_params("syncy", 1, NodeState::WaitPrimary, "0/2000"))
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 2, NodeState::Catchingup, "0/2000"))
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state,
        NodeState::Secondary
    );

    // the standby reaching secondary promotes the primary
    monitor
        .node_active(&active_params("syncy", 2, NodeState::Secondary, "0/2000"))
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::Primary
    );

    // the standby dropping out demotes it back to wait_primary
    monitor
        .node_active(&active_params("syncy", 2, NodeState::Catchingup, "0/2000"))
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::WaitPrimary
    );
}

#[test]
fn a_catching_up_standby_needs_sync_state_when_the_formation_demands_it() {
    let (monitor, _clock) = monitor();
    let formation = FormationId::new("syncy");
    let mut definition = Formation::new(formation.clone(), "postgres");
    definition.number_sync_standbys = 1;
    monitor.create_formation(definition);
    monitor
        .register_node(&formation, "localhost", 9876, "postgres", None, None, None)
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 1, NodeState::Single, "0/2000"))
        .unwrap();
    monitor
        .register_node(&formation, "localhost", 9877, "postgres", None, None, None)
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 1, NodeState::Single, "0/2000"))
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 1, NodeState::WaitPrimary, "0/2000"))
        .unwrap();
    monitor
        .node_active(&active_params("syncy", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();

    // catching up, close enough, but still async: not promoted
    let mut params = active_params("syncy", 2, NodeState::Catchingup, "0/2000");
    params.replication_state = ReplicationState::Async;
    let row = monitor.node_active(&params).unwrap();
    assert_eq!(row.assigned_state, NodeState::Catchingup);
}

// ============================================================================
// Events and notifications
// ============================================================================

#[test]
fn every_goal_change_appends_a_matching_event() {
    let (monitor, clock) = monitor();
    let rx = monitor.subscribe();

    register(&monitor, 9876, None);
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    register(&monitor, 9877, None);
    clock.advance(Duration::from_secs(1));
    monitor
        .node_active(&active_params("default", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();

    let events = monitor.get_events(Some(&default_formation()), None, 100);
    assert!(!events.is_empty());

    // strictly monotonic ids, newest first
    for window in events.windows(2) {
        assert!(window[0].event_id > window[1].event_id);
    }

    // the goal changes all produced state notifications
    let notifications: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(notifications
        .iter()
        .any(|n| n.payload == "default/0/1/wait_primary"));
    assert!(notifications
        .iter()
        .any(|n| n.payload == "default/0/2/catchingup"));
}

#[test]
fn get_other_nodes_reports_the_peers() {
    let (monitor, clock) = monitor();
    three_node_group(&monitor, &clock);

    let others = monitor.get_other_nodes(NodeId::new(2)).unwrap();
    let mut ids: Vec<u64> = others.iter().map(|n| n.node_id.as_u64()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 3]);
    assert!(others
        .iter()
        .find(|n| n.node_id == NodeId::new(1))
        .unwrap()
        .is_primary);

    let primary = monitor.get_primary(None, None).unwrap();
    assert_eq!(primary.node_id, NodeId::new(1));
    assert_eq!(primary.node_name, NodeName::new("node_1"));
}

// ============================================================================
// Failure detection through the rules engine
// ============================================================================

fn plain_formation() -> Formation {
    Formation::new(FormationId::default_formation(), "postgres")
}

fn node(id: u64, reported: NodeState, goal: NodeState, at: Timestamp) -> Node {
    Node {
        node_id: NodeId::new(id),
        node_name: NodeName::for_node(NodeId::new(id)),
        formation_id: FormationId::default_formation(),
        group_id: GroupId::ZERO,
        host: "localhost".into(),
        port: 5432,
        system_identifier: None,
        candidate_priority: CandidatePriority::default(),
        replication_quorum: true,
        reported_state: reported,
        goal_state: goal,
        reported_lsn: Lsn::new(0x1000),
        reported_pg_is_running: true,
        reported_replication_state: ReplicationState::Sync,
        health: Health::Good,
        health_checked_at: at,
        state_changed_at: at,
        reported_at: at,
        lost_at: None,
        wants_maintenance: false,
    }
}

#[test]
fn a_silent_unhealthy_primary_triggers_a_failover() {
    let config = MonitorConfig::production();
    let t0 = Timestamp::from_secs(100);
    let now = Timestamp::from_secs(200);

    let mut primary = node(1, NodeState::Primary, NodeState::Primary, t0);
    primary.health = Health::Bad;
    let standby = node(2, NodeState::Secondary, NodeState::Secondary, now);

    let outcome = rules::evaluate(
        &plain_formation(),
        &[primary, standby],
        GroupFlags::default(),
        &config,
        now,
    );

    assert_eq!(outcome.newly_lost, vec![NodeId::new(1)]);
    let goal_of = |id: u64| {
        outcome
            .assignments
            .iter()
            .find(|a| a.node_id == NodeId::new(id))
            .map(|a| a.goal)
    };
    assert_eq!(goal_of(1), Some(NodeState::DemoteTimeout));
    assert_eq!(goal_of(2), Some(NodeState::ReportLsn));
    assert_eq!(outcome.flags.failover_started_at, Some(now));
}

#[test]
fn a_silent_but_probe_healthy_primary_is_not_lost() {
    let config = MonitorConfig::production();
    let t0 = Timestamp::from_secs(100);
    let now = Timestamp::from_secs(200);

    // silent past the timeout, but the probe still answers
    let mut primary = node(1, NodeState::Primary, NodeState::Primary, t0);
    primary.health = Health::Good;
    primary.health_checked_at = now;
    let standby = node(2, NodeState::Secondary, NodeState::Secondary, now);

    let outcome = rules::evaluate(
        &plain_formation(),
        &[primary, standby],
        GroupFlags::default(),
        &config,
        now,
    );
    assert!(outcome.newly_lost.is_empty());
    assert!(outcome.assignments.is_empty());
}

#[test]
fn election_tie_breaks_on_lowest_node_id() {
    let config = MonitorConfig::production();
    let t0 = Timestamp::from_secs(100);
    let started = Timestamp::from_secs(90);

    let a = node(4, NodeState::ReportLsn, NodeState::ReportLsn, t0);
    let b = node(7, NodeState::ReportLsn, NodeState::ReportLsn, t0);

    let outcome = rules::evaluate(
        &plain_formation(),
        &[a, b],
        GroupFlags {
            failover_requested: false,
            failover_started_at: Some(started),
        },
        &config,
        t0,
    );

    let goal_of = |id: u64| {
        outcome
            .assignments
            .iter()
            .find(|a| a.node_id == NodeId::new(id))
            .map(|a| a.goal)
    };
    assert_eq!(goal_of(4), Some(NodeState::PreparePromotion));
    assert_eq!(goal_of(7), Some(NodeState::FastForward));
    assert_eq!(outcome.flags.failover_started_at, None);
}

#[test]
fn a_demote_timeout_expires_into_demoted() {
    let config = MonitorConfig::production();
    let assigned_at = Timestamp::from_secs(100);
    let now = assigned_at.plus(config.demote_timeout + Duration::from_secs(1));

    let mut old_primary = node(1, NodeState::Primary, NodeState::DemoteTimeout, assigned_at);
    old_primary.lost_at = Some(assigned_at);
    old_primary.health = Health::Bad;
    let standby = node(2, NodeState::ReportLsn, NodeState::ReportLsn, now);

    let outcome = rules::evaluate(
        &plain_formation(),
        &[old_primary, standby],
        GroupFlags {
            failover_requested: false,
            failover_started_at: Some(assigned_at),
        },
        &config,
        now,
    );
    assert!(outcome
        .assignments
        .iter()
        .any(|a| a.node_id == NodeId::new(1) && a.goal == NodeState::Demoted));
}

#[test]
fn a_node_reporting_primary_against_its_role_is_fenced() {
    let config = MonitorConfig::production();
    let now = Timestamp::from_secs(100);

    // node 1 believes it is primary, the catalog says otherwise
    let stale = node(1, NodeState::Primary, NodeState::Catchingup, now);
    let current = node(2, NodeState::Primary, NodeState::Primary, now);

    let outcome = rules::evaluate(
        &plain_formation(),
        &[stale, current],
        GroupFlags::default(),
        &config,
        now,
    );
    assert!(outcome
        .assignments
        .iter()
        .any(|a| a.node_id == NodeId::new(1) && a.goal == NodeState::Demote));
}

#[test]
fn evaluation_is_deterministic() {
    let config = MonitorConfig::production();
    let now = Timestamp::from_secs(200);
    let t0 = Timestamp::from_secs(100);

    let mut primary = node(1, NodeState::Primary, NodeState::Primary, t0);
    primary.health = Health::Bad;
    let standby = node(2, NodeState::Secondary, NodeState::Secondary, now);
    let nodes = vec![primary, standby];

    let first = rules::evaluate(&plain_formation(), &nodes, GroupFlags::default(), &config, now);
    let second = rules::evaluate(&plain_formation(), &nodes, GroupFlags::default(), &config, now);
    assert_eq!(first, second);
}

// ============================================================================
// Maintenance
// ============================================================================

#[test]
fn standby_maintenance_walks_the_maintenance_ladder() {
    let (monitor, clock) = monitor();
    three_node_group(&monitor, &clock);

    monitor.enable_maintenance(NodeId::new(3)).unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::WaitMaintenance
    );

    monitor
        .node_active(&active_params(
            "default",
            3,
            NodeState::WaitMaintenance,
            "0/1000",
        ))
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::Maintenance
    );

    monitor.disable_maintenance(NodeId::new(3)).unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(3)).unwrap().goal_state,
        NodeState::Catchingup
    );
}

#[test]
fn primary_maintenance_requires_a_candidate_and_fails_over() {
    let (monitor, clock) = monitor();

    // single node group: no candidate to fail over to
    register(&monitor, 9876, None);
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    assert!(matches!(
        monitor.enable_maintenance(NodeId::new(1)),
        Err(MonitorError::NoEligibleCandidate { .. })
    ));

    // with a secondary in place the primary drains first
    register(&monitor, 9877, None);
    monitor
        .node_active(&active_params("default", 1, NodeState::Single, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::WaitStandby, "0/0"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 1, NodeState::WaitPrimary, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::Catchingup, "0/1000"))
        .unwrap();
    monitor
        .node_active(&active_params("default", 2, NodeState::Secondary, "0/1000"))
        .unwrap();
    clock.advance(Duration::from_secs(1));

    monitor.enable_maintenance(NodeId::new(1)).unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::Draining
    );
    assert_eq!(
        monitor.node_snapshot(NodeId::new(2)).unwrap().goal_state,
        NodeState::ReportLsn
    );
}

// ============================================================================
// Replication settings
// ============================================================================

#[test]
fn changing_replication_settings_reaches_apply_settings() {
    let (monitor, clock) = monitor();
    three_node_group(&monitor, &clock);
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::Primary
    );

    monitor
        .set_node_replication_properties(NodeId::new(3), Some(CandidatePriority::new(80)), None)
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::ApplySettings
    );

    // once the primary reports, it settles back into primary
    monitor
        .node_active(&active_params(
            "default",
            1,
            NodeState::ApplySettings,
            "0/1000",
        ))
        .unwrap();
    assert_eq!(
        monitor.node_snapshot(NodeId::new(1)).unwrap().goal_state,
        NodeState::Primary
    );
}
