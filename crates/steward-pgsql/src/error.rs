//! Error types for database access.

use std::time::Duration;

use thiserror::Error;

/// Result type for database operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur talking to a PostgreSQL server.
#[derive(Debug, Error)]
pub enum PgError {
    /// Could not reach the server; worth retrying.
    #[error("connection failed: {message}")]
    Connect { message: String },

    /// Gave up retrying a connection after the allowed time.
    #[error("connection retries exhausted after {elapsed:?}: {message}")]
    RetriesExhausted { elapsed: Duration, message: String },

    /// A command failed on an established connection.
    ///
    /// `sqlstate` is `None` when the server did not report one; callers
    /// must treat that as an unknown error, never match it against a
    /// known code.
    #[error("command failed{}: {message}", sqlstate_suffix(.sqlstate))]
    Command {
        sqlstate: Option<String>,
        message: String,
    },

    /// The server answered but not in the shape we expect.
    #[error("unexpected result: {0}")]
    Parse(String),

    /// An invalid connection string.
    #[error("invalid connection string: {0}")]
    ConnInfo(String),

    /// Interrupted by the cooperative stop flag.
    #[error("interrupted by shutdown request")]
    Interrupted,
}

fn sqlstate_suffix(sqlstate: &Option<String>) -> String {
    match sqlstate {
        Some(code) => format!(" [{code}]"),
        None => String::new(),
    }
}

impl PgError {
    /// Returns true if the operation is worth retrying on the next loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, PgError::Connect { .. })
    }

    /// The SQLSTATE of a failed command, when the server reported one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            PgError::Command {
                sqlstate: Some(code),
                ..
            } if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

/// SQLSTATE for `duplicate_object` (42710).
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

/// SQLSTATE for `duplicate_database` (42P04).
pub const SQLSTATE_DUPLICATE_DATABASE: &str = "42P04";
