//! The seam over the one database this keeper owns.
//!
//! Transition handlers and the keeper loop only ever talk to
//! [`LocalPostgres`]; the production implementation drives a real
//! server ([`crate::process::ProcessPostgres`]) and the simulation
//! harness scripts one in memory. Every method is idempotent: the
//! keeper may re-run a transition after a crash and must converge.

use steward_pgsql::value::SyncStateAndLsn;
use steward_pgsql::ConnInfo;
use steward_types::{Lsn, ReplicationState, SystemIdentifier};

use crate::error::KeeperResult;

/// What the keeper observed about the local database this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostgresObservation {
    pub is_running: bool,
    pub is_in_recovery: bool,
    /// Current WAL position: write position on a primary, last received
    /// position on a standby. Invalid while the server is down.
    pub current_lsn: Lsn,
    /// The replication sync state, as far as it can be observed.
    pub replication_state: ReplicationState,
}

/// Operations on the local PostgreSQL instance.
///
/// All methods take `&mut self`: the implementation owns its
/// connections and process handles.
pub trait LocalPostgres {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Whether the data directory holds an initialized cluster.
    fn is_initialized(&mut self) -> KeeperResult<bool>;

    /// Initializes the data directory (initdb).
    fn initialize(&mut self) -> KeeperResult<()>;

    /// Whether the server is currently running.
    fn is_running(&mut self) -> KeeperResult<bool>;

    /// Starts the server if it is not running.
    fn start(&mut self) -> KeeperResult<()>;

    /// Stops the server if it is running.
    fn stop(&mut self) -> KeeperResult<()>;

    // ========================================================================
    // Probes
    // ========================================================================

    /// Whether the server is in recovery (acting as a standby).
    fn is_in_recovery(&mut self) -> KeeperResult<bool>;

    /// The local cluster's system identifier.
    fn system_identifier(&mut self) -> KeeperResult<SystemIdentifier>;

    /// The primary's current WAL write position.
    fn current_wal_lsn(&mut self) -> KeeperResult<Lsn>;

    /// The standby's last received-and-flushed WAL position.
    fn last_receive_lsn(&mut self) -> KeeperResult<Lsn>;

    /// Asks the current primary how it sees this standby's replication:
    /// the sync state of our slot, and the primary's position.
    fn replication_state_from_primary(
        &mut self,
        primary: &ConnInfo,
        slot_name: &str,
    ) -> KeeperResult<Option<SyncStateAndLsn>>;

    // ========================================================================
    // Replication configuration
    // ========================================================================

    /// Creates a physical replication slot for an incoming standby.
    fn create_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()>;

    /// Drops a standby's replication slot.
    fn drop_replication_slot(&mut self, slot_name: &str) -> KeeperResult<()>;

    /// Allows a standby host to connect for replication (pg_hba).
    fn add_standby_access(&mut self, host: &str) -> KeeperResult<()>;

    /// Enables synchronous replication.
    fn enable_synchronous_replication(&mut self) -> KeeperResult<()>;

    /// Disables synchronous replication and unblocks waiting backends.
    fn disable_synchronous_replication(&mut self) -> KeeperResult<()>;

    /// Runs a CHECKPOINT, issued before the server stops while being
    /// demoted so a later pg_rewind has a recent restart point.
    fn checkpoint(&mut self) -> KeeperResult<()>;

    /// Makes the server accept writes (or refuse them).
    fn set_read_only(&mut self, read_only: bool) -> KeeperResult<()>;

    // ========================================================================
    // Role changes
    // ========================================================================

    /// Clones the primary into the local data directory (pg_basebackup)
    /// and configures the result as a standby of it.
    fn init_as_standby(&mut self, primary: &ConnInfo, slot_name: &str) -> KeeperResult<()>;

    /// Reconfigures an existing cluster to follow a (new) primary and
    /// restarts it as a standby.
    fn follow_primary(&mut self, primary: &ConnInfo, slot_name: &str) -> KeeperResult<()>;

    /// Rewinds the local cluster onto the given primary's timeline
    /// (pg_rewind).
    fn rewind(&mut self, primary: &ConnInfo) -> KeeperResult<()>;

    /// Cuts the replication stream without promoting.
    fn disconnect_replication(&mut self) -> KeeperResult<()>;

    /// Replays whatever WAL is still available locally.
    fn replay_available_wal(&mut self) -> KeeperResult<()>;

    /// Promotes the standby and waits until it leaves recovery.
    fn promote(&mut self) -> KeeperResult<()>;
}
