//! # steward-sim: deterministic simulation of a Steward formation
//!
//! Runs real monitor and keeper code with everything nondeterministic
//! replaced by scripted doubles:
//!
//! - [`SimClock`]: time advances only when the test says so
//! - [`ScriptedPostgres`]: an in-memory database with controllable
//!   LSNs, crashes and failure injection
//! - [`SimProbe`]: a health probe the test flips on and off
//! - [`InProcessMonitorClient`]: the keeper's monitor handle wired
//!   straight to an in-process [`steward_monitor::Monitor`]
//! - [`SimCluster`]: a whole formation stepped one keeper cycle at a
//!   time, with the invariants checked after every step
//!
//! The scenario tests in this crate drive entire failovers in
//! simulated milliseconds and assert the system-wide invariants after
//! every single transition.

pub mod clock;
pub mod harness;
pub mod invariant;
pub mod monitor_client;
pub mod postgres;
pub mod probe;

pub use clock::SimClock;
pub use harness::SimCluster;
pub use invariant::InvariantChecker;
pub use monitor_client::InProcessMonitorClient;
pub use postgres::ScriptedPostgres;
pub use probe::SimProbe;
