//! # steward-keeper: the per-node agent
//!
//! A keeper runs next to one PostgreSQL instance. Each loop cycle it
//! observes the local database, reports to the monitor via
//! `node_active`, and drives the database toward whatever goal state
//! comes back:
//!
//! ```text
//! observe local postgres ──► node_active(reported, lsn) ──► monitor
//!                                                             │
//!       apply transition (start/stop/promote/rewind/...) ◄────┘
//! ```
//!
//! ## Key components
//!
//! - [`fsm`]: the transition table mapping `(reported, goal)` pairs to
//!   idempotent actions
//! - [`postgres`]: the [`LocalPostgres`] seam over the one database the
//!   keeper owns, with the production implementation in [`process`]
//! - [`monitor_client`]: the opaque handle to the monitor
//! - [`keeper`]: the loop itself
//! - [`state_file`]: the crash-safe binary state file
//! - [`pidfile`]: the guard against two keepers on one data directory
//!
//! The keeper shares no state with other keepers and holds no catalog:
//! the monitor's answers are the only coordination it ever sees.

pub mod config;
pub mod error;
pub mod fsm;
pub mod keeper;
pub mod monitor_client;
pub mod pidfile;
pub mod postgres;
pub mod process;
pub mod state_file;

pub use config::KeeperConfig;
pub use error::{KeeperError, KeeperResult};
pub use keeper::Keeper;
pub use monitor_client::MonitorClient;
pub use postgres::{LocalPostgres, PostgresObservation};
pub use state_file::KeeperStateFile;

use steward_types::NodeId;

/// The deterministic name of the replication slot a standby uses.
///
/// Slot names survive restarts and are unique per node, so a rejoining
/// standby always finds its own slot.
pub fn replication_slot_name(node_id: NodeId) -> String {
    format!("steward_standby_{node_id}")
}
