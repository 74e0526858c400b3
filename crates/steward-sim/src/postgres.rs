//! The scripted database.
//!
//! Implements [`LocalPostgres`] entirely in memory. The handle is a
//! shared reference: the keeper owns one clone, the test keeps
//! another and uses it to advance LSNs, crash the server or inject
//! command failures.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use steward_keeper::{KeeperError, KeeperResult, LocalPostgres};
use steward_pgsql::value::SyncStateAndLsn;
use steward_pgsql::{ConnInfo, PgError};
use steward_types::{Lsn, ReplicationState, SystemIdentifier};

/// Every cluster cloned inside one simulation shares this identifier.
pub const SIM_SYSTEM_IDENTIFIER: u64 = 7_000_000_000_000_000_001;

#[derive(Debug)]
struct PgSim {
    initialized: bool,
    running: bool,
    in_recovery: bool,
    read_only: bool,
    lsn: Lsn,
    system_identifier: SystemIdentifier,
    sync_replication: bool,
    replication_state: ReplicationState,
    following: Option<String>,
    slots: BTreeSet<String>,
    allowed_hosts: BTreeSet<String>,
    checkpoints: u32,
    /// Operation names that fail on their next invocation.
    failures: BTreeSet<&'static str>,
}

/// A handle to one scripted database.
#[derive(Debug, Clone)]
pub struct ScriptedPostgres {
    inner: Arc<Mutex<PgSim>>,
}

impl Default for ScriptedPostgres {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPostgres {
    /// Creates a database that does not exist yet (no initdb ran).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PgSim {
                initialized: false,
                running: false,
                in_recovery: false,
                read_only: false,
                lsn: Lsn::INVALID,
                system_identifier: SystemIdentifier::new(SIM_SYSTEM_IDENTIFIER),
                sync_replication: false,
                replication_state: ReplicationState::Sync,
                following: None,
                slots: BTreeSet::new(),
                allowed_hosts: BTreeSet::new(),
                checkpoints: 0,
                failures: BTreeSet::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PgSim> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(sim: &mut PgSim, op: &'static str) -> KeeperResult<()> {
        if sim.failures.remove(op) {
            return Err(KeeperError::Command {
                command: op.to_string(),
                message: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn require_running(sim: &PgSim) -> KeeperResult<()> {
        if !sim.running {
            return Err(KeeperError::Postgres(PgError::Connect {
                message: "the server is not running".into(),
            }));
        }
        Ok(())
    }

    // ========================================================================
    // Scripting surface
    // ========================================================================

    /// Makes the named operation fail once.
    pub fn fail_next(&self, op: &'static str) {
        self.lock().failures.insert(op);
    }

    /// Moves the WAL position forward.
    pub fn advance_lsn(&self, bytes: u64) {
        let mut sim = self.lock();
        sim.lsn = Lsn::new(sim.lsn.as_u64() + bytes);
    }

    /// Sets the WAL position outright.
    pub fn set_lsn(&self, lsn: Lsn) {
        self.lock().lsn = lsn;
    }

    /// The current WAL position.
    pub fn lsn(&self) -> Lsn {
        self.lock().lsn
    }

    /// Scripts the sync state the primary reports for this standby.
    pub fn set_replication_state(&self, state: ReplicationState) {
        self.lock().replication_state = state;
    }

    /// Kills the server without any shutdown protocol.
    pub fn crash(&self) {
        self.lock().running = false;
    }

    /// Changes the system identifier, as a restored-from-elsewhere
    /// cluster would have.
    pub fn set_system_identifier(&self, sysid: SystemIdentifier) {
        self.lock().system_identifier = sysid;
    }

    /// Whether the server currently runs.
    pub fn running(&self) -> bool {
        self.lock().running
    }

    /// Whether the server is a standby right now.
    pub fn in_recovery(&self) -> bool {
        self.lock().in_recovery
    }

    /// Whether synchronous replication is configured.
    pub fn sync_replication(&self) -> bool {
        self.lock().sync_replication
    }

    /// The replication slots that exist on this server.
    pub fn slots(&self) -> Vec<String> {
        self.lock().slots.iter().cloned().collect()
    }

    /// The conninfo of the primary this node follows, if any.
    pub fn following(&self) -> Option<String> {
        self.lock().following.clone()
    }

    /// How many CHECKPOINT commands this server has run.
    pub fn checkpoints(&self) -> u32 {
        self.lock().checkpoints
    }
}

impl LocalPostgres for ScriptedPostgres {
    fn is_initialized(&mut self) -> KeeperResult<bool> {
        Ok(self.lock().initialized)
    }

    fn initialize(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "initialize")?;
        sim.initialized = true;
        sim.lsn = Lsn::new(0x0100_0000);
        Ok(())
    }

    fn is_running(&mut self) -> KeeperResult<bool> {
        Ok(self.lock().running)
    }

    fn start(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "start")?;
        if !sim.initialized {
            return Err(KeeperError::DataDirectory {
                path: "<sim>".into(),
                message: "not initialized".into(),
            });
        }
        sim.running = true;
        Ok(())
    }

    fn stop(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "stop")?;
        sim.running = false;
        Ok(())
    }

    fn is_in_recovery(&mut self) -> KeeperResult<bool> {
        let sim = self.lock();
        Self::require_running(&sim)?;
        Ok(sim.in_recovery)
    }

    fn system_identifier(&mut self) -> KeeperResult<SystemIdentifier> {
        let sim = self.lock();
        if !sim.initialized {
            return Err(KeeperError::DataDirectory {
                path: "<sim>".into(),
                message: "not initialized".into(),
            });
        }
        Ok(sim.system_identifier)
    }

    fn current_wal_lsn(&mut self) -> KeeperResult<Lsn> {
        let sim = self.lock();
        Self::require_running(&sim)?;
        Ok(sim.lsn)
    }

    fn last_receive_lsn(&mut self) -> KeeperResult<Lsn> {
        let sim = self.lock();
        Self::require_running(&sim)?;
        Ok(sim.lsn)
    }

    fn replication_state_from_primary(
        &mut self,
        _primary: &ConnInfo,
        _slot_name: &str,
    ) -> KeeperResult<Option<SyncStateAndLsn>> {
        let sim = self.lock();
        Ok(Some(SyncStateAndLsn {
            sync_state: sim.replication_state,
            current_lsn: sim.lsn,
        }))
    }

    fn create_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "create_replication_slot")?;
        Self::require_running(&sim)?;
        sim.slots.insert(slot_name.to_string());
        Ok(())
    }

    fn drop_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.slots.remove(slot_name);
        Ok(())
    }

    fn add_standby_access(&mut self, host: &str) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.allowed_hosts.insert(host.to_string());
        Ok(())
    }

    fn enable_synchronous_replication(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.sync_replication = true;
        Ok(())
    }

    fn disable_synchronous_replication(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.sync_replication = false;
        Ok(())
    }

    fn checkpoint(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "checkpoint")?;
        Self::require_running(&sim)?;
        sim.checkpoints += 1;
        Ok(())
    }

    fn set_read_only(&mut self, read_only: bool) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.read_only = read_only;
        Ok(())
    }

    fn init_as_standby(&mut self, primary: &ConnInfo, _slot_name: &str) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "init_as_standby")?;
        sim.initialized = true;
        sim.running = true;
        sim.in_recovery = true;
        sim.read_only = true;
        // a base backup is a byte copy of the primary's cluster
        sim.system_identifier = SystemIdentifier::new(SIM_SYSTEM_IDENTIFIER);
        if sim.lsn.is_invalid() {
            sim.lsn = Lsn::new(0x0100_0000);
        }
        sim.following = Some(primary.to_uri());
        Ok(())
    }

    fn follow_primary(&mut self, primary: &ConnInfo, _slot_name: &str) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "follow_primary")?;
        if !sim.initialized {
            return Err(KeeperError::DataDirectory {
                path: "<sim>".into(),
                message: "not initialized".into(),
            });
        }
        sim.running = true;
        sim.in_recovery = true;
        sim.read_only = true;
        sim.following = Some(primary.to_uri());
        Ok(())
    }

    fn rewind(&mut self, _primary: &ConnInfo) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "rewind")?;
        sim.running = false;
        Ok(())
    }

    fn disconnect_replication(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::require_running(&sim)?;
        sim.following = None;
        Ok(())
    }

    fn replay_available_wal(&mut self) -> KeeperResult<()> {
        let sim = self.lock();
        Self::require_running(&sim)?;
        Ok(())
    }

    fn promote(&mut self) -> KeeperResult<()> {
        let mut sim = self.lock();
        Self::check_failure(&mut sim, "promote")?;
        Self::require_running(&sim)?;
        sim.in_recovery = false;
        sim.read_only = false;
        sim.following = None;
        Ok(())
    }
}
