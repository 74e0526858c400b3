//! # steward-types: Core types for Steward
//!
//! This crate contains the shared vocabulary of the Steward failover
//! controller:
//! - Entity IDs ([`NodeId`], [`GroupId`], [`FormationId`], [`NodeName`])
//! - The failover state machine states ([`NodeState`])
//! - Replication metadata ([`ReplicationState`], [`Health`], [`Lsn`],
//!   [`SystemIdentifier`], [`CandidatePriority`])
//! - Time ([`Timestamp`], the injectable [`Clock`] seam)
//! - The keeper/monitor RPC row types ([`protocol`])
//!
//! The monitor and the keeper never exchange richer types than these;
//! the catalog schema expressed here is the only boundary contract
//! between them.

pub mod clock;
pub mod ids;
pub mod lsn;
pub mod protocol;
pub mod state;

pub use clock::{Clock, SystemClock, Timestamp};
pub use ids::{CandidatePriority, FormationId, GroupId, NodeId, NodeName, SystemIdentifier};
pub use lsn::Lsn;
pub use state::{Health, NodeState, ReplicationState, StateParseError};
