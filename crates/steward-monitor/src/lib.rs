//! # steward-monitor: the Steward monitor
//!
//! The monitor is the single authority over a fleet of replicated
//! database nodes. Keepers report their observed state through
//! [`Monitor::node_active`]; the monitor runs the assignment rules over
//! the group and hands back a goal state. Every decision is appended to
//! the event bus and pushed to notification subscribers.
//!
//! ## Key components
//!
//! - [`catalog`]: formations, groups, nodes and their reported state
//! - [`rules`]: the pure assignment engine - one deterministic function
//!   from a group snapshot and the current time to goal-state changes
//! - [`monitor`]: the operations, each serialized under one lock (the
//!   in-process analogue of a serializable transaction)
//! - [`events`]: the append-only event log and notification channels
//! - [`health`]: the independent health probe seam and the lost-node
//!   predicate
//!
//! ## Design
//!
//! The rules engine is pure and never touches a clock or the catalog
//! directly: the shell collects a snapshot, calls [`rules::evaluate`],
//! then applies the returned assignments. Identical snapshots always
//! produce identical assignments.

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod monitor;
pub mod rules;

pub use catalog::{Catalog, Formation, FormationKind, GroupFlags, Node};
pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use events::{Event, EventBus, EventId, Notification, NotifyChannel};
pub use health::HealthProbe;
pub use monitor::Monitor;

#[cfg(test)]
mod tests;
