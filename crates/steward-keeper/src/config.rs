//! Keeper configuration.
//!
//! Built programmatically; the serde derives let an outer layer persist
//! it in whatever format it owns. Paths for the state and PID files
//! derive from the data directory unless set explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use steward_pgsql::ConnInfo;
use steward_types::{CandidatePriority, FormationId};

/// Configuration of one keeper instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// The formation this node joins.
    pub formation: FormationId,
    /// Connection string of the monitor.
    pub monitor: String,
    /// The local PostgreSQL instance.
    pub postgresql: PostgresSetup,
    /// Replication settings requested at registration.
    pub replication: ReplicationSettings,
    /// Loop and timeout tuning.
    pub timing: TimingConfig,
}

impl KeeperConfig {
    /// Creates a configuration with defaults for everything but the
    /// essentials.
    pub fn new(
        formation: FormationId,
        monitor: impl Into<String>,
        pgdata: impl Into<PathBuf>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            formation,
            monitor: monitor.into(),
            postgresql: PostgresSetup {
                pgdata: pgdata.into(),
                host: host.into(),
                port,
                dbname: "postgres".into(),
                user: "postgres".into(),
                bin_dir: None,
            },
            replication: ReplicationSettings::default(),
            timing: TimingConfig::default(),
        }
    }

    /// Sets the database name.
    pub fn with_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.postgresql.dbname = dbname.into();
        self
    }

    /// Sets the requested candidate priority.
    pub fn with_candidate_priority(mut self, priority: CandidatePriority) -> Self {
        self.replication.candidate_priority = Some(priority);
        self
    }

    /// Opts out of the synchronous replication quorum.
    pub fn without_replication_quorum(mut self) -> Self {
        self.replication.replication_quorum = Some(false);
        self
    }

    /// Sets the loop interval.
    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.timing.loop_interval = interval;
        self
    }

    /// Where the binary state file lives.
    pub fn state_file_path(&self) -> PathBuf {
        sibling_of_pgdata(&self.postgresql.pgdata, "steward.state")
    }

    /// Where the PID file lives.
    pub fn pid_file_path(&self) -> PathBuf {
        sibling_of_pgdata(&self.postgresql.pgdata, "steward.pid")
    }

    /// The connection descriptor of the local database.
    pub fn local_conninfo(&self) -> ConnInfo {
        ConnInfo::new(
            self.postgresql.host.clone(),
            self.postgresql.port,
            self.postgresql.dbname.clone(),
        )
        .with_user(self.postgresql.user.clone())
    }
}

/// Keeper files sit next to the data directory, never inside it: a
/// pg_basebackup wipes PGDATA and must not wipe the keeper state.
fn sibling_of_pgdata(pgdata: &Path, file_name: &str) -> PathBuf {
    match pgdata.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// The local PostgreSQL instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSetup {
    /// The data directory.
    pub pgdata: PathBuf,
    /// Host other nodes use to reach this database.
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// Directory holding initdb, pg_ctl and friends; `None` means they
    /// are on PATH.
    pub bin_dir: Option<PathBuf>,
}

/// Replication settings requested at registration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicationSettings {
    /// Requested election priority; monitor default when absent.
    pub candidate_priority: Option<CandidatePriority>,
    /// Requested quorum participation; monitor default when absent.
    pub replication_quorum: Option<bool>,
}

/// Loop and timeout tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep between keeper cycles.
    pub loop_interval: Duration,
    /// Timeout for one monitor connection attempt.
    pub connect_timeout: Duration,
    /// Total budget for retrying the monitor before giving up a cycle.
    pub network_partition_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            network_partition_timeout: Duration::from_secs(20),
        }
    }
}
