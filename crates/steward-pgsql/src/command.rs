//! SQL commands issued by the keeper.
//!
//! Every command is written against the [`PgExecutor`] seam so that the
//! production client and the test fakes run the exact same code. The
//! SQL itself mirrors what a failover agent needs: replication slots,
//! synchronous replication settings, WAL positions and extension
//! setup.

use steward_types::Lsn;
use tracing::{debug, info};

use crate::error::{PgError, PgResult, SQLSTATE_DUPLICATE_OBJECT};
use crate::value::{self, Rows, SyncStateAndLsn};

/// Executes SQL against one PostgreSQL server.
///
/// Parameters are passed in text form (`$1`, `$2`, ...); results come
/// back as text-mode [`Rows`]. Implementations map their transport and
/// server errors into [`PgError`].
pub trait PgExecutor {
    /// Runs a query and returns its rows.
    fn query(&mut self, sql: &str, params: &[&str]) -> PgResult<Rows>;

    /// Runs a statement, discarding any rows.
    fn execute(&mut self, sql: &str, params: &[&str]) -> PgResult<()> {
        self.query(sql, params).map(|_| ())
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Returns true if the server is in recovery (acting as a standby).
pub fn is_in_recovery(pg: &mut dyn PgExecutor) -> PgResult<bool> {
    let rows = pg.query("SELECT pg_is_in_recovery()", &[])?;
    value::parse_bool(&rows)
}

/// The primary's current WAL insert position.
pub fn current_wal_lsn(pg: &mut dyn PgExecutor) -> PgResult<Lsn> {
    let rows = pg.query("SELECT pg_current_wal_lsn()::text", &[])?;
    value::parse_lsn(&rows)
}

/// The standby's last received-and-flushed WAL position.
///
/// Every transport or shape failure is an error here; a standby that
/// cannot tell us its position must not look like one at `0/0`.
pub fn last_receive_lsn(pg: &mut dyn PgExecutor) -> PgResult<Lsn> {
    let rows = pg.query("SELECT pg_last_wal_receive_lsn()::text", &[])?;
    value::parse_lsn(&rows)
}

/// The local cluster's 64-bit system identifier.
pub fn system_identifier(pg: &mut dyn PgExecutor) -> PgResult<u64> {
    let rows = pg.query(
        "SELECT system_identifier::text FROM pg_control_system()",
        &[],
    )?;
    value::parse_bigint(&rows)
}

/// The sync state of the standby using the given slot, together with
/// the primary's current LSN.
///
/// Returns `Ok(None)` when no standby is attached to the slot and
/// `missing_ok` allows it.
pub fn sync_state_and_current_lsn(
    pg: &mut dyn PgExecutor,
    slot_name: &str,
    missing_ok: bool,
) -> PgResult<Option<SyncStateAndLsn>> {
    let rows = pg.query(
        "SELECT rep.sync_state, pg_current_wal_lsn()::text \
           FROM pg_replication_slots slot \
           JOIN pg_stat_replication rep ON rep.pid = slot.active_pid \
          WHERE slot.slot_name = $1",
        &[slot_name],
    )?;
    match value::parse_sync_state_and_lsn(&rows)? {
        Some(result) => Ok(Some(result)),
        None if missing_ok => Ok(None),
        None => Err(PgError::Parse(format!(
            "no standby is using replication slot {slot_name:?}"
        ))),
    }
}

// ============================================================================
// Replication configuration
// ============================================================================

/// Creates a physical replication slot, tolerating an existing one.
pub fn create_replication_slot(pg: &mut dyn PgExecutor, slot_name: &str) -> PgResult<()> {
    info!(slot = slot_name, "creating replication slot");
    let result = pg.execute(
        "SELECT pg_create_physical_replication_slot($1)",
        &[slot_name],
    );
    match result {
        Err(ref err) if err.sqlstate() == Some(SQLSTATE_DUPLICATE_OBJECT) => {
            debug!(slot = slot_name, "replication slot already exists");
            Ok(())
        }
        other => other,
    }
}

/// Drops a replication slot if it exists.
pub fn drop_replication_slot(pg: &mut dyn PgExecutor, slot_name: &str) -> PgResult<()> {
    info!(slot = slot_name, "dropping replication slot");
    pg.execute(
        "SELECT pg_drop_replication_slot(slot_name) \
           FROM pg_replication_slots \
          WHERE slot_name = $1",
        &[slot_name],
    )
}

/// Enables synchronous replication with the given standby names value.
pub fn enable_synchronous_replication(
    pg: &mut dyn PgExecutor,
    standby_names: &str,
) -> PgResult<()> {
    info!(standby_names, "enabling synchronous replication");
    alter_system_set(pg, "synchronous_standby_names", standby_names)
}

/// Disables synchronous replication and unblocks backends waiting on it.
pub fn disable_synchronous_replication(pg: &mut dyn PgExecutor) -> PgResult<()> {
    info!("disabling synchronous replication");
    alter_system_set(pg, "synchronous_standby_names", "")?;

    debug!("cancelling backends blocked on synchronous replication");
    pg.execute(
        "SELECT pg_cancel_backend(pid) \
           FROM pg_stat_activity \
          WHERE wait_event = 'SyncRep'",
        &[],
    )
}

/// Sets `default_transaction_read_only`, used while demoting.
pub fn set_default_transaction_read_only(pg: &mut dyn PgExecutor, on: bool) -> PgResult<()> {
    info!(read_only = on, "setting default_transaction_read_only");
    alter_system_set(
        pg,
        "default_transaction_read_only",
        if on { "on" } else { "off" },
    )
}

/// `ALTER SYSTEM SET`, then reload so every session sees the change.
fn alter_system_set(pg: &mut dyn PgExecutor, name: &str, quoted_value: &str) -> PgResult<()> {
    // setting names come from a fixed set in this crate, never from input
    let sql = format!("ALTER SYSTEM SET {name} TO '{}'", quoted_value.replace('\'', "''"));
    pg.execute(&sql, &[])?;
    reload_conf(pg)
}

/// Cuts the replication stream by clearing `primary_conninfo`.
///
/// On reload the WAL receiver disconnects; the server stays in
/// recovery, which is exactly what the promotion ladder wants.
pub fn disconnect_replication(pg: &mut dyn PgExecutor) -> PgResult<()> {
    info!("disconnecting replication");
    alter_system_set(pg, "primary_conninfo", "")
}

/// Asks open sessions to reload the configuration files.
pub fn reload_conf(pg: &mut dyn PgExecutor) -> PgResult<()> {
    pg.execute("SELECT pg_reload_conf()", &[])
}

/// Runs a CHECKPOINT.
///
/// Issued before the server stops on the demotion path: a fresh
/// restart point bounds how much WAL a later pg_rewind against the new
/// primary has to grind through.
pub fn checkpoint(pg: &mut dyn PgExecutor) -> PgResult<()> {
    info!("running a checkpoint before shutdown");
    pg.execute("CHECKPOINT", &[])
}

// ============================================================================
// Setup
// ============================================================================

/// Creates an extension, accepting that it may already exist.
///
/// A failure without a SQLSTATE is an unknown error and propagates: a
/// missing code must never be confused with "already exists".
pub fn create_extension(pg: &mut dyn PgExecutor, name: &str) -> PgResult<()> {
    info!(extension = name, "creating extension");
    let sql = format!("CREATE EXTENSION \"{}\"", name.replace('"', "\"\""));
    match pg.execute(&sql, &[]) {
        Err(ref err) if err.sqlstate() == Some(SQLSTATE_DUPLICATE_OBJECT) => {
            info!(extension = name, "extension already exists, skipping");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Executor fake that pops scripted responses and records SQL.
    struct Script {
        responses: VecDeque<PgResult<Rows>>,
        seen: Vec<String>,
    }

    impl Script {
        fn new(responses: Vec<PgResult<Rows>>) -> Self {
            Self {
                responses: responses.into(),
                seen: Vec::new(),
            }
        }
    }

    impl PgExecutor for Script {
        fn query(&mut self, sql: &str, _params: &[&str]) -> PgResult<Rows> {
            self.seen.push(sql.to_string());
            self.responses
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn one(value: &str) -> Rows {
        vec![vec![Some(value.to_string())]]
    }

    #[test]
    fn is_in_recovery_parses_booleans() {
        let mut pg = Script::new(vec![Ok(one("t"))]);
        assert!(is_in_recovery(&mut pg).unwrap());
    }

    #[test]
    fn last_receive_lsn_propagates_transport_failures() {
        let mut pg = Script::new(vec![Err(PgError::Connect {
            message: "gone".into(),
        })]);
        assert!(matches!(
            last_receive_lsn(&mut pg),
            Err(PgError::Connect { .. })
        ));
    }

    #[test]
    fn create_extension_tolerates_duplicate_object() {
        let mut pg = Script::new(vec![Err(PgError::Command {
            sqlstate: Some(SQLSTATE_DUPLICATE_OBJECT.into()),
            message: "already there".into(),
        })]);
        assert!(create_extension(&mut pg, "steward").is_ok());
    }

    #[test]
    fn create_extension_treats_missing_sqlstate_as_unknown_error() {
        let mut pg = Script::new(vec![Err(PgError::Command {
            sqlstate: None,
            message: "server closed the connection".into(),
        })]);
        assert!(create_extension(&mut pg, "steward").is_err());

        let mut pg = Script::new(vec![Err(PgError::Command {
            sqlstate: Some(String::new()),
            message: "server closed the connection".into(),
        })]);
        assert!(create_extension(&mut pg, "steward").is_err());
    }

    #[test]
    fn disable_sync_rep_cancels_blocked_backends() {
        let mut pg = Script::new(vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())]);
        disable_synchronous_replication(&mut pg).unwrap();
        assert!(pg.seen[0].contains("synchronous_standby_names"));
        assert!(pg.seen[1].contains("pg_reload_conf"));
        assert!(pg.seen[2].contains("SyncRep"));
    }

    #[test]
    fn sync_state_missing_standby_honors_missing_ok() {
        let mut pg = Script::new(vec![Ok(Vec::new())]);
        assert_eq!(
            sync_state_and_current_lsn(&mut pg, "steward_standby_2", true).unwrap(),
            None
        );

        let mut pg = Script::new(vec![Ok(Vec::new())]);
        assert!(sync_state_and_current_lsn(&mut pg, "steward_standby_2", false).is_err());
    }

    #[test]
    fn alter_system_quotes_values() {
        let mut pg = Script::new(vec![Ok(Vec::new()), Ok(Vec::new())]);
        enable_synchronous_replication(&mut pg, "ANY 1 (steward_standby_2)").unwrap();
        assert!(pg.seen[0].contains("TO 'ANY 1 (steward_standby_2)'"));
    }

    #[test]
    fn checkpoint_issues_the_plain_command() {
        let mut pg = Script::new(vec![Ok(Vec::new())]);
        checkpoint(&mut pg).unwrap();
        assert_eq!(pg.seen, vec!["CHECKPOINT".to_string()]);
    }
}
