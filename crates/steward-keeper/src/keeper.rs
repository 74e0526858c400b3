//! The keeper loop.
//!
//! One cycle: observe the local database, call `node_active`, run the
//! transition toward whatever goal came back, persist the state file,
//! sleep. Transient failures leave the reported state unchanged and
//! retry next cycle; fatal failures halt transitions so the monitor
//! times this node out and fails over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use steward_pgsql::ConnInfo;
use steward_types::protocol::{NodeActiveParams, NodeAddressRow, RegisterParams};
use steward_types::{Clock, NodeState, ReplicationState};

use crate::config::KeeperConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::fsm::{self, TransitionAction};
use crate::monitor_client::MonitorClient;
use crate::pidfile::PidFile;
use crate::postgres::{LocalPostgres, PostgresObservation};
use crate::replication_slot_name;
use crate::state_file::KeeperStateFile;

/// How finely the loop sleep is sliced to notice the stop flag.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// The agent driving one database node.
pub struct Keeper<P, M> {
    config: KeeperConfig,
    postgres: P,
    monitor: M,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    state: KeeperStateFile,
    /// Set when a fatal error halted transitions.
    halted: Option<String>,
}

impl<P: LocalPostgres, M: MonitorClient> Keeper<P, M> {
    /// Brings up a keeper: claims the data directory, then loads the
    /// state file or registers with the monitor.
    pub fn start(
        config: KeeperConfig,
        mut postgres: P,
        mut monitor: M,
        clock: Arc<dyn Clock>,
        stop: Arc<AtomicBool>,
    ) -> KeeperResult<Self> {
        PidFile::create(
            &config.pid_file_path(),
            std::process::id(),
            &config.postgresql.pgdata.display().to_string(),
        )?;

        let state = match KeeperStateFile::load(&config.state_file_path())? {
            Some(state) => {
                info!(
                    node = %state.node_id,
                    current = %state.current_state,
                    "resuming from state file"
                );
                state
            }
            None => {
                let system_identifier = if postgres.is_initialized()? {
                    Some(postgres.system_identifier()?)
                } else {
                    None
                };
                let registration = monitor.register_node(&RegisterParams {
                    formation: config.formation.clone(),
                    host: config.postgresql.host.clone(),
                    port: config.postgresql.port,
                    dbname: config.postgresql.dbname.clone(),
                    system_identifier,
                    candidate_priority: config.replication.candidate_priority,
                    replication_quorum: config.replication.replication_quorum,
                })?;
                info!(
                    node = %registration.node_id,
                    name = %registration.node_name,
                    assigned = %registration.assigned_state,
                    "registered with the monitor"
                );
                let mut state = KeeperStateFile::initial(
                    registration.node_id,
                    registration.group_id,
                    registration.assigned_state,
                );
                state.system_identifier = system_identifier;
                state.candidate_priority = registration.candidate_priority;
                state.replication_quorum = registration.replication_quorum;
                state.store(&config.state_file_path())?;
                state
            }
        };

        Ok(Self {
            config,
            postgres,
            monitor,
            clock,
            stop,
            state,
            halted: None,
        })
    }

    /// The id the monitor assigned to this node.
    pub fn node_id(&self) -> steward_types::NodeId {
        self.state.node_id
    }

    /// The keeper's current FSM position.
    pub fn current_state(&self) -> NodeState {
        self.state.current_state
    }

    /// The goal the monitor last assigned.
    pub fn assigned_state(&self) -> NodeState {
        self.state.assigned_state
    }

    /// The fatal alert, if transitions are halted.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    // ========================================================================
    // The loop
    // ========================================================================

    /// Runs cycles until asked to stop, the node is dropped, or a fatal
    /// error halts transitions.
    pub fn run(&mut self) -> KeeperResult<()> {
        info!(node = %self.state.node_id, "keeper service starting");
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("asked to stop, shutting down");
                break;
            }

            match self.step() {
                Ok(true) => {}
                Ok(false) => {
                    info!("node dropped from the formation, exiting");
                    break;
                }
                Err(err) if err.is_fatal() => {
                    error!(%err, "fatal error, halting transitions");
                    break;
                }
                Err(err) => {
                    warn!(%err, "cycle failed, retrying next loop");
                }
            }

            self.sleep_between_cycles();
        }

        PidFile::remove(&self.config.pid_file_path())?;
        Ok(())
    }

    fn sleep_between_cycles(&self) {
        let mut remaining = self.config.timing.loop_interval;
        while remaining > Duration::ZERO && !self.stop.load(Ordering::Relaxed) {
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    /// One cycle. Returns `Ok(false)` once the node has fully dropped.
    ///
    /// A fatal error raises the permanent alert: further cycles keep
    /// reporting but never transition again.
    pub fn step(&mut self) -> KeeperResult<bool> {
        if let Some(alert) = &self.halted {
            warn!(alert = %alert, "transitions are halted");
            return Ok(true);
        }
        match self.cycle() {
            Err(err) if err.is_fatal() => {
                self.halted = Some(err.to_string());
                Err(err)
            }
            other => other,
        }
    }

    fn cycle(&mut self) -> KeeperResult<bool> {
        let observation = self.observe();

        debug!(
            node = %self.state.node_id,
            state = %self.state.current_state,
            running = observation.is_running,
            lsn = %observation.current_lsn,
            "calling node_active"
        );

        let row = match self.monitor.node_active(&NodeActiveParams {
            formation: self.config.formation.clone(),
            node_id: self.state.node_id,
            group_id: self.state.group_id,
            reported_state: self.state.current_state,
            reported_lsn: observation.current_lsn,
            pg_is_running: observation.is_running,
            replication_state: observation.replication_state,
            system_identifier: self.state.system_identifier,
        }) {
            Ok(row) => row,
            Err(err @ KeeperError::MonitorUnreachable(_)) => {
                // keep the database as it is; the monitor will catch up
                warn!(%err, "monitor unreachable, keeping current state");
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        self.state.assigned_state = row.assigned_state;
        self.state.candidate_priority = row.candidate_priority;
        self.state.replication_quorum = row.replication_quorum;
        self.state.last_monitor_contact = self.clock.now();
        if !observation.current_lsn.is_invalid() {
            self.state.current_lsn = observation.current_lsn;
        }

        // the monitor confirmed the drop: clean up and stop reporting
        if self.state.current_state == NodeState::Dropped
            && row.assigned_state == NodeState::Dropped
        {
            KeeperStateFile::remove(&self.config.state_file_path())?;
            return Ok(false);
        }

        if self.state.assigned_state != self.state.current_state {
            self.reach_assigned_state()?;
        } else {
            self.ensure_current_state(&observation)?;
        }

        self.state.store(&self.config.state_file_path())?;
        Ok(true)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Best-effort look at the local database. Failures are logged and
    /// degrade to defaults; the monitor still gets a report.
    fn observe(&mut self) -> PostgresObservation {
        let is_running = self.postgres.is_running().unwrap_or_else(|err| {
            warn!(%err, "could not check whether postgres is running");
            false
        });
        if !is_running {
            return PostgresObservation {
                is_running: false,
                is_in_recovery: false,
                current_lsn: self.state.current_lsn,
                replication_state: ReplicationState::Unknown,
            };
        }

        let is_in_recovery = self.postgres.is_in_recovery().unwrap_or_else(|err| {
            warn!(%err, "could not check recovery status");
            false
        });

        let current_lsn = if is_in_recovery {
            self.postgres.last_receive_lsn()
        } else {
            self.postgres.current_wal_lsn()
        }
        .unwrap_or_else(|err| {
            warn!(%err, "could not read the WAL position");
            self.state.current_lsn
        });

        let replication_state = if is_in_recovery {
            self.standby_replication_state()
        } else {
            ReplicationState::Unknown
        };

        PostgresObservation {
            is_running,
            is_in_recovery,
            current_lsn,
            replication_state,
        }
    }

    /// A standby's sync state lives on the primary; ask it.
    fn standby_replication_state(&mut self) -> ReplicationState {
        let Ok(primary) = self.monitor.get_primary() else {
            return ReplicationState::Unknown;
        };
        let conninfo = self.conninfo_for(&primary);
        let slot = replication_slot_name(self.state.node_id);
        match self
            .postgres
            .replication_state_from_primary(&conninfo, &slot)
        {
            Ok(Some(result)) => result.sync_state,
            Ok(None) => ReplicationState::Unknown,
            Err(err) => {
                debug!(%err, "could not read sync state from the primary");
                ReplicationState::Unknown
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Walks the transition table from the current to the assigned
    /// state.
    fn reach_assigned_state(&mut self) -> KeeperResult<()> {
        let from = self.state.current_state;
        let to = self.state.assigned_state;
        let transition = fsm::find_transition(from, to)?;

        info!(%from, %to, "FSM transition: {}", transition.comment);

        self.run_action(transition.action)
            .map_err(|source| KeeperError::Transition {
                from,
                to,
                source: Box::new(source),
            })?;

        self.state.current_state = to;
        info!(state = %to, "transition complete");
        Ok(())
    }

    fn run_action(&mut self, action: TransitionAction) -> KeeperResult<()> {
        match action {
            TransitionAction::None => Ok(()),
            TransitionAction::InitAsPrimary => self.init_as_primary(),
            TransitionAction::PrepareReplication => self.prepare_replication(),
            TransitionAction::DisableReplication => self.disable_replication(),
            TransitionAction::EnableSyncRep => self.postgres.enable_synchronous_replication(),
            TransitionAction::DisableSyncRep => self.postgres.disable_synchronous_replication(),
            TransitionAction::StopPostgres => self.stop_postgres(),
            TransitionAction::ResumeAsPrimary => self.resume_as_primary(),
            TransitionAction::InitAsStandby => self.init_as_standby(),
            TransitionAction::RewindOrInit => self.rewind_or_init(),
            TransitionAction::PreparePromotion => self.postgres.replay_available_wal(),
            TransitionAction::StopReplication => self.postgres.disconnect_replication(),
            TransitionAction::PromoteStandby => self.promote_standby(),
            TransitionAction::FastForward => self.postgres.replay_available_wal(),
            TransitionAction::JoinSecondary => self.join_secondary(),
            TransitionAction::StartMaintenance => self.stop_postgres(),
            TransitionAction::RestartStandby => self.join_secondary(),
            TransitionAction::DropNode => self.stop_postgres(),
        }
    }

    fn init_as_primary(&mut self) -> KeeperResult<()> {
        if !self.postgres.is_initialized()? {
            self.postgres.initialize()?;
            self.state.system_identifier = Some(self.postgres.system_identifier()?);
        }
        if !self.postgres.is_running()? {
            self.postgres.start()?;
        }
        self.postgres.set_read_only(false)
    }

    /// Creates slots and opens access for every standby of the group.
    fn prepare_replication(&mut self) -> KeeperResult<()> {
        if !self.postgres.is_running()? {
            self.postgres.start()?;
        }
        let peers = self.monitor.get_other_nodes(self.state.node_id)?;
        for peer in peers.iter().filter(|p| !p.is_primary) {
            self.postgres
                .create_replication_slot(&replication_slot_name(peer.node_id))?;
            self.postgres.add_standby_access(&peer.host)?;
        }
        Ok(())
    }

    /// The group shrank back to this node alone: run standalone again.
    fn disable_replication(&mut self) -> KeeperResult<()> {
        self.postgres.disable_synchronous_replication()?;
        let peers = self.monitor.get_other_nodes(self.state.node_id)?;
        for peer in peers.iter().filter(|p| !p.is_primary) {
            self.postgres
                .drop_replication_slot(&replication_slot_name(peer.node_id))?;
        }
        Ok(())
    }

    fn stop_postgres(&mut self) -> KeeperResult<()> {
        if self.postgres.is_running()? {
            // a fresh restart point bounds how much WAL a later
            // pg_rewind has to replay; losing it is not worth a retry
            if let Err(err) = self.postgres.checkpoint() {
                warn!(%err, "checkpoint before stopping failed");
            }
            self.postgres.stop()?;
        }
        Ok(())
    }

    fn resume_as_primary(&mut self) -> KeeperResult<()> {
        if !self.postgres.is_running()? {
            self.postgres.start()?;
        }
        self.postgres.disable_synchronous_replication()?;
        self.postgres.set_read_only(false)
    }

    fn init_as_standby(&mut self) -> KeeperResult<()> {
        let primary = self.monitor.get_primary()?;
        let conninfo = self.conninfo_for(&primary);
        let slot = replication_slot_name(self.state.node_id);
        self.postgres.init_as_standby(&conninfo, &slot)?;
        // the clone inherits the primary's system identifier
        self.state.system_identifier = Some(self.postgres.system_identifier()?);
        Ok(())
    }

    /// A demoted primary rejoins: rewind onto the new timeline, and if
    /// that fails take a fresh base backup.
    fn rewind_or_init(&mut self) -> KeeperResult<()> {
        let primary = self.monitor.get_primary()?;
        let conninfo = self.conninfo_for(&primary);
        let slot = replication_slot_name(self.state.node_id);

        match self.postgres.rewind(&conninfo) {
            Ok(()) => self.postgres.follow_primary(&conninfo, &slot),
            Err(err) => {
                warn!(%err, "pg_rewind failed, falling back to a base backup");
                self.postgres.init_as_standby(&conninfo, &slot)
            }
        }
    }

    fn promote_standby(&mut self) -> KeeperResult<()> {
        if !self.postgres.is_running()? {
            self.postgres.start()?;
        }
        if self.postgres.is_in_recovery()? {
            self.postgres.promote()?;
        }
        self.postgres.set_read_only(false)
    }

    fn join_secondary(&mut self) -> KeeperResult<()> {
        // errors here are transient: the new primary may not be
        // writable yet, and the next cycle retries
        let primary = self.monitor.get_primary()?;
        let conninfo = self.conninfo_for(&primary);
        let slot = replication_slot_name(self.state.node_id);
        self.postgres.follow_primary(&conninfo, &slot)
    }

    /// Keeps the database matching the state we already reached.
    fn ensure_current_state(&mut self, observation: &PostgresObservation) -> KeeperResult<()> {
        let should_run = match self.state.current_state {
            NodeState::Single
            | NodeState::WaitPrimary
            | NodeState::Primary
            | NodeState::JoinPrimary
            | NodeState::ApplySettings
            | NodeState::Secondary
            | NodeState::Catchingup
            | NodeState::JoinSecondary
            | NodeState::ReportLsn
            | NodeState::PreparePromotion => Some(true),
            NodeState::Draining
            | NodeState::Demote
            | NodeState::DemoteTimeout
            | NodeState::Demoted
            | NodeState::WaitMaintenance
            | NodeState::Maintenance
            | NodeState::Dropped => Some(false),
            _ => None,
        };

        match should_run {
            Some(true) if !observation.is_running => {
                if self.postgres.is_initialized()? {
                    warn!(state = %self.state.current_state, "postgres is down, restarting it");
                    self.postgres.start()?;
                }
                Ok(())
            }
            Some(false) if observation.is_running => {
                warn!(state = %self.state.current_state, "postgres should be down, stopping it");
                self.postgres.stop()
            }
            _ => Ok(()),
        }
    }

    fn conninfo_for(&self, address: &NodeAddressRow) -> ConnInfo {
        ConnInfo::new(
            address.host.clone(),
            address.port,
            self.config.postgresql.dbname.clone(),
        )
        .with_user(self.config.postgresql.user.clone())
    }
}

/// Wires SIGINT and SIGTERM to the cooperative stop flag.
pub fn install_signal_handlers(stop: &Arc<AtomicBool>) -> std::io::Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(stop))?;
    Ok(())
}
