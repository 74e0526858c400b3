//! The production executor, backed by the `postgres` crate.
//!
//! Connections are opened with a bounded retry loop: transient failures
//! back off exponentially (with jitter) until `total_timeout` elapses,
//! mirroring the network-partition budget the rest of the system works
//! with. The cooperative stop flag is honored between attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use postgres::types::ToSql;
use postgres::{Client, NoTls};
use rand::Rng;
use tracing::{debug, warn};

use crate::command::PgExecutor;
use crate::conninfo::ConnInfo;
use crate::error::{PgError, PgResult};
use crate::value::Rows;

// ============================================================================
// Retry policy
// ============================================================================

/// Bounds on connection establishment.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Total time allowed across all attempts.
    pub total_timeout: Duration,
    /// First backoff delay; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// The production defaults: 10s per attempt, bounded overall by the
    /// network partition timeout.
    pub fn production() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(20),
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            total_timeout: Duration::ZERO,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        // spread reconnections out so keepers don't stampede the monitor
        let jitter_ns = rand::thread_rng().gen_range(0..=exp.as_nanos().max(1) / 4);
        exp + Duration::from_nanos(u64::try_from(jitter_ns).unwrap_or(0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::production()
    }
}

// ============================================================================
// PgClient
// ============================================================================

/// A live connection to one PostgreSQL server.
pub struct PgClient {
    client: Client,
    /// Where this client is connected, for logging.
    target: String,
}

impl PgClient {
    /// Connects once, without retrying.
    pub fn connect(conninfo: &ConnInfo) -> PgResult<Self> {
        let config = conninfo
            .clone()
            .with_keyword("connect_timeout", "10")
            .to_keyword_value();
        let client = Client::connect(&config, NoTls).map_err(|e| PgError::Connect {
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            target: conninfo.to_string(),
        })
    }

    /// Connects with the retry loop of the given policy.
    ///
    /// Returns [`PgError::Interrupted`] if the stop flag is raised while
    /// waiting, and [`PgError::RetriesExhausted`] once the total budget
    /// is spent.
    pub fn connect_with_retry(
        conninfo: &ConnInfo,
        policy: &RetryPolicy,
        stop: &AtomicBool,
    ) -> PgResult<Self> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match Self::connect(conninfo) {
                Ok(client) => {
                    if attempt > 0 {
                        debug!(server = %conninfo, attempts = attempt + 1, "connected after retrying");
                    }
                    return Ok(client);
                }
                Err(err) => {
                    let elapsed = started.elapsed();
                    if elapsed >= policy.total_timeout {
                        return Err(PgError::RetriesExhausted {
                            elapsed,
                            message: err.to_string(),
                        });
                    }
                    warn!(server = %conninfo, %err, "connection failed, retrying");
                }
            }

            if stop.load(Ordering::Relaxed) {
                return Err(PgError::Interrupted);
            }
            std::thread::sleep(policy.next_delay(attempt));
            attempt = attempt.saturating_add(1);
        }
    }

    /// The connection target, password elided.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn map_error(err: postgres::Error) -> PgError {
        match err.as_db_error() {
            Some(db) => PgError::Command {
                sqlstate: Some(db.code().code().to_string()),
                message: db.message().to_string(),
            },
            None => PgError::Connect {
                message: err.to_string(),
            },
        }
    }
}

impl PgExecutor for PgClient {
    fn query(&mut self, sql: &str, params: &[&str]) -> PgResult<Rows> {
        let sql_params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &sql_params)
            .map_err(Self::map_error)?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| {
                        row.try_get::<_, Option<String>>(i).map_err(|e| {
                            PgError::Parse(format!("column {i} is not text: {e}"))
                        })
                    })
                    .collect()
            })
            .collect()
    }

    fn execute(&mut self, sql: &str, params: &[&str]) -> PgResult<()> {
        let sql_params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(sql, &sql_params)
            .map(|_| ())
            .map_err(Self::map_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            connect_timeout: Duration::from_secs(10),
            total_timeout: Duration::from_secs(20),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        // jitter adds at most a quarter on top of the exponential delay
        assert!(policy.next_delay(0) >= Duration::from_millis(100));
        assert!(policy.next_delay(0) <= Duration::from_millis(125));
        assert!(policy.next_delay(10) <= Duration::from_millis(1250));
    }

    #[test]
    fn retry_honors_the_stop_flag() {
        let conninfo = ConnInfo::new("127.0.0.1", 1, "nope");
        let stop = AtomicBool::new(true);
        let policy = RetryPolicy {
            connect_timeout: Duration::from_millis(10),
            total_timeout: Duration::from_secs(3600),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let result = PgClient::connect_with_retry(&conninfo, &policy, &stop);
        assert!(matches!(result, Err(PgError::Interrupted)));
    }

    #[test]
    fn retry_gives_up_after_the_budget() {
        let conninfo = ConnInfo::new("127.0.0.1", 1, "nope");
        let stop = AtomicBool::new(false);
        let policy = RetryPolicy {
            connect_timeout: Duration::from_millis(10),
            total_timeout: Duration::ZERO,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let result = PgClient::connect_with_retry(&conninfo, &policy, &stop);
        assert!(matches!(result, Err(PgError::RetriesExhausted { .. })));
    }
}
