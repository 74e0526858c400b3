//! # steward-pgsql: PostgreSQL client plumbing for Steward
//!
//! This crate carries everything Steward needs to talk to a PostgreSQL
//! server, without deciding *when* to talk to it:
//!
//! - [`conninfo`]: connection strings, both the `postgres://` URI form
//!   and the `key=value` form with its quoting rules
//! - [`value`]: the closed set of typed result parsers for the
//!   single-row, few-column answers our SQL produces
//! - [`command`]: the SQL commands the keeper issues against the local
//!   database, written over the [`PgExecutor`] seam
//! - [`client`]: the production executor backed by the `postgres`
//!   crate, with the bounded connection-retry loop
//!
//! Everything here returns [`PgError`]; transport failures are never
//! swallowed, and command failures carry their SQLSTATE when the server
//! provided one.

pub mod client;
pub mod command;
pub mod conninfo;
pub mod error;
pub mod value;

pub use client::{PgClient, RetryPolicy};
pub use command::PgExecutor;
pub use conninfo::ConnInfo;
pub use error::{PgError, PgResult};
pub use value::Rows;
