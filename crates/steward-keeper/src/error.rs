//! Keeper error types.
//!
//! The keeper cares about one thing per error: can the next loop cycle
//! retry it, or must transitions halt? [`KeeperError::is_fatal`] makes
//! that split explicit so the loop never matches on individual
//! variants.

use steward_pgsql::PgError;
use steward_types::{NodeState, SystemIdentifier};
use thiserror::Error;

/// Result type for keeper operations.
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Errors that can occur in the keeper.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Talking to the local database failed.
    #[error("local database: {0}")]
    Postgres(#[from] PgError),

    /// The monitor could not be reached; retried next cycle.
    #[error("monitor unreachable: {0}")]
    MonitorUnreachable(#[source] PgError),

    /// The monitor refused the operation with a named error.
    #[error("monitor: {0}")]
    MonitorLogical(String),

    /// The monitor fenced this node over its system identifier.
    #[error("system identifier changed: monitor expects {expected}, local cluster is {actual}")]
    SystemIdentifierChanged {
        expected: SystemIdentifier,
        actual: SystemIdentifier,
    },

    /// No transition path exists between these states.
    #[error("no transition from {from} to {to}")]
    NoTransitionPath { from: NodeState, to: NodeState },

    /// A transition handler failed.
    #[error("transition {from} -> {to} failed: {source}")]
    Transition {
        from: NodeState,
        to: NodeState,
        #[source]
        source: Box<KeeperError>,
    },

    /// An external database command (initdb, pg_ctl, ...) failed.
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    /// The data directory is unusable.
    #[error("data directory {path}: {message}")]
    DataDirectory { path: String, message: String },

    /// Reading or writing the state file failed.
    #[error("state file {path}: {source}")]
    StateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but cannot be understood.
    #[error("state file {path} is corrupt: {message}")]
    StateFileCorrupt { path: String, message: String },

    /// Another keeper already owns this data directory.
    #[error("data directory already owned by pid {pid}")]
    AlreadyRunning { pid: u32 },

    /// Reading or writing the PID file failed.
    #[error("pid file {path}: {source}")]
    PidFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration cannot work.
    #[error("configuration: {0}")]
    Config(String),

    /// Interrupted by the cooperative stop flag.
    #[error("interrupted by shutdown request")]
    Interrupted,
}

impl KeeperError {
    /// Returns true if retrying cannot help and transitions must halt.
    ///
    /// Everything else is handled by staying in the current reported
    /// state and trying again on the next loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeeperError::SystemIdentifierChanged { .. }
                | KeeperError::NoTransitionPath { .. }
                | KeeperError::DataDirectory { .. }
                | KeeperError::StateFileCorrupt { .. }
                | KeeperError::AlreadyRunning { .. }
                | KeeperError::Config(_)
        ) || matches!(
            self,
            KeeperError::Transition { source, .. } if source.is_fatal()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_not_fatal() {
        let err = KeeperError::MonitorUnreachable(PgError::Connect {
            message: "no route".into(),
        });
        assert!(!err.is_fatal());
    }

    #[test]
    fn sysid_changes_are_fatal_even_wrapped_in_a_transition() {
        let inner = KeeperError::SystemIdentifierChanged {
            expected: SystemIdentifier::new(1),
            actual: SystemIdentifier::new(2),
        };
        assert!(inner.is_fatal());

        let wrapped = KeeperError::Transition {
            from: NodeState::Single,
            to: NodeState::WaitPrimary,
            source: Box::new(KeeperError::SystemIdentifierChanged {
                expected: SystemIdentifier::new(1),
                actual: SystemIdentifier::new(2),
            }),
        };
        assert!(wrapped.is_fatal());

        let retryable = KeeperError::Transition {
            from: NodeState::Single,
            to: NodeState::WaitPrimary,
            source: Box::new(KeeperError::Postgres(PgError::Connect {
                message: "busy".into(),
            })),
        };
        assert!(!retryable.is_fatal());
    }
}
