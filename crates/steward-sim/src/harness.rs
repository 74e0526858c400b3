//! The cluster harness.
//!
//! Wires a monitor and any number of keepers together in one process
//! and steps them one keeper cycle at a time. After every step the
//! system-wide invariants are checked against the monitor's catalog,
//! so a protocol violation fails the scenario at the exact step that
//! caused it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use steward_keeper::{Keeper, KeeperConfig, KeeperResult};
use steward_monitor::catalog::{Formation, Node};
use steward_monitor::{Monitor, MonitorConfig};
use steward_types::{FormationId, GroupId, NodeId, NodeState};

use crate::clock::SimClock;
use crate::invariant::InvariantChecker;
use crate::monitor_client::InProcessMonitorClient;
use crate::postgres::ScriptedPostgres;
use crate::probe::SimProbe;

/// How far the clock moves between settle rounds.
const ROUND_TICK: Duration = Duration::from_millis(10);

/// One simulated node: its keeper and its scripted database.
pub struct SimNode {
    pub node_id: NodeId,
    pub postgres: ScriptedPostgres,
    keeper: Keeper<ScriptedPostgres, InProcessMonitorClient>,
}

/// A whole formation under simulation.
pub struct SimCluster {
    pub clock: SimClock,
    pub monitor: Arc<Monitor>,
    pub probe: SimProbe,
    formation: FormationId,
    nodes: Vec<SimNode>,
    checker: InvariantChecker,
    workdir: tempfile::TempDir,
}

impl SimCluster {
    /// Creates a cluster around the default formation.
    pub fn new() -> Self {
        Self::with_formation(None)
    }

    /// Creates a cluster, optionally with a formation created up
    /// front (for non-default sync settings).
    pub fn with_formation(formation: Option<Formation>) -> Self {
        let clock = SimClock::new();
        let monitor = Arc::new(Monitor::new(
            MonitorConfig::simulation(),
            Arc::new(clock.clone()),
        ));
        let formation_id = formation
            .as_ref()
            .map(|f| f.id.clone())
            .unwrap_or_else(FormationId::default_formation);
        if let Some(definition) = formation {
            monitor.create_formation(definition);
        }
        Self {
            clock,
            monitor,
            probe: SimProbe::new(),
            formation: formation_id,
            nodes: Vec::new(),
            checker: InvariantChecker::new(),
            workdir: tempfile::tempdir().expect("simulation tempdir"),
        }
    }

    /// Adds a node and registers its keeper with the monitor.
    ///
    /// Returns the index used with [`step`](Self::step).
    pub fn add_node(&mut self) -> usize {
        let index = self.nodes.len();
        let port = 7000 + index as u16;
        let node_dir = self.workdir.path().join(format!("node_{index}"));
        std::fs::create_dir_all(&node_dir).expect("node workdir");

        let config = KeeperConfig::new(
            self.formation.clone(),
            "postgres://monitor.sim/steward",
            node_dir.join("pgdata"),
            "localhost",
            port,
        );
        let postgres = ScriptedPostgres::new();
        let client = InProcessMonitorClient::new(
            Arc::clone(&self.monitor),
            self.formation.clone(),
            GroupId::ZERO,
        );
        let keeper = Keeper::start(
            config,
            postgres.clone(),
            client,
            Arc::new(self.clock.clone()),
            Arc::new(AtomicBool::new(false)),
        )
        .expect("keeper start");

        let node_id = keeper.node_id();
        self.nodes.push(SimNode {
            node_id,
            postgres,
            keeper,
        });
        self.verify();
        index
    }

    /// Runs one keeper cycle for one node, then checks invariants.
    pub fn step(&mut self, index: usize) -> KeeperResult<bool> {
        let result = self.nodes[index].keeper.step();
        self.verify();
        result
    }

    /// Runs one cycle for every node in order.
    pub fn step_all(&mut self) {
        for index in 0..self.nodes.len() {
            // transient errors are part of a scenario; fatal ones are
            // surfaced through the keeper state the test asserts on
            let _ = self.step(index);
        }
    }

    /// Runs one cycle for every node except one (its keeper is "down").
    pub fn step_all_except(&mut self, skip: usize) {
        for index in 0..self.nodes.len() {
            if index != skip {
                let _ = self.step(index);
            }
        }
    }

    /// Steps everyone and ticks the clock until the predicate holds.
    ///
    /// Returns false if it never did within `max_rounds`.
    pub fn run_until(&mut self, max_rounds: usize, pred: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..max_rounds {
            if pred(self) {
                return true;
            }
            self.step_all();
            self.clock.advance(ROUND_TICK);
        }
        pred(self)
    }

    /// Like [`run_until`](Self::run_until) with one keeper down.
    pub fn run_until_except(
        &mut self,
        skip: usize,
        max_rounds: usize,
        pred: impl Fn(&Self) -> bool,
    ) -> bool {
        for _ in 0..max_rounds {
            if pred(self) {
                return true;
            }
            self.step_all_except(skip);
            self.monitor
                .check_nodes_health(&self.probe)
                .expect("health sweep");
            self.verify();
            self.clock.advance(ROUND_TICK);
        }
        pred(self)
    }

    /// The state a keeper last reached.
    pub fn keeper_state(&self, index: usize) -> NodeState {
        self.nodes[index].keeper.current_state()
    }

    /// The fatal alert of a halted keeper, if any.
    pub fn keeper_halted(&self, index: usize) -> Option<&str> {
        self.nodes[index].keeper.halted()
    }

    /// The monitor's record of a node.
    pub fn node_record(&self, index: usize) -> Node {
        self.monitor
            .node_snapshot(self.nodes[index].node_id)
            .expect("node registered")
    }

    /// A node's scripted database.
    pub fn postgres(&self, index: usize) -> &ScriptedPostgres {
        &self.nodes[index].postgres
    }

    /// The monitor-assigned id of a node.
    pub fn node_id(&self, index: usize) -> NodeId {
        self.nodes[index].node_id
    }

    /// Checks all invariants against the current catalog.
    pub fn verify(&mut self) {
        let nodes = self
            .monitor
            .group_snapshot(&self.formation, GroupId::ZERO);
        let events = self.monitor.all_events();
        self.checker.check(&nodes, &events);
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}
