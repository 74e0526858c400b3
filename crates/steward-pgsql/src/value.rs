//! Typed result parsing.
//!
//! Steward's SQL returns tiny result sets: one row with one value, or
//! one row with a handful of columns. Instead of a generic row mapper
//! there is a closed set of parsers, one per result shape the system
//! actually uses. Each parser checks the row and column counts it
//! expects and fails loudly otherwise.

use std::str::FromStr;

use steward_types::{Lsn, NodeId, ReplicationState};

use crate::error::{PgError, PgResult};

/// A result set in text form: rows of nullable column values.
///
/// This mirrors what the wire protocol delivers in text mode; executors
/// hand rows to the typed parsers below.
pub type Rows = Vec<Vec<Option<String>>>;

// ============================================================================
// Single-value parsers
// ============================================================================

fn single_value(rows: &Rows) -> PgResult<&str> {
    if rows.len() != 1 {
        return Err(PgError::Parse(format!("expected 1 row, got {}", rows.len())));
    }
    let row = &rows[0];
    if row.len() != 1 {
        return Err(PgError::Parse(format!(
            "expected 1 column, got {}",
            row.len()
        )));
    }
    row[0]
        .as_deref()
        .ok_or_else(|| PgError::Parse("expected a value, got null".into()))
}

/// Parses a single boolean value (`t` / `f` in text mode).
pub fn parse_bool(rows: &Rows) -> PgResult<bool> {
    match single_value(rows)? {
        "t" | "true" => Ok(true),
        "f" | "false" => Ok(false),
        other => Err(PgError::Parse(format!("expected a boolean, got {other:?}"))),
    }
}

/// Parses a single signed 64-bit integer.
pub fn parse_int(rows: &Rows) -> PgResult<i64> {
    let value = single_value(rows)?;
    value
        .parse()
        .map_err(|_| PgError::Parse(format!("expected an integer, got {value:?}")))
}

/// Parses a single unsigned 64-bit integer.
///
/// System identifiers do not fit in `i64`; this parser is its own arm,
/// not a fallthrough from the signed one.
pub fn parse_bigint(rows: &Rows) -> PgResult<u64> {
    let value = single_value(rows)?;
    value
        .parse()
        .map_err(|_| PgError::Parse(format!("expected a bigint, got {value:?}")))
}

/// Parses a single string value.
pub fn parse_string(rows: &Rows) -> PgResult<String> {
    Ok(single_value(rows)?.to_string())
}

/// Parses a single LSN value.
pub fn parse_lsn(rows: &Rows) -> PgResult<Lsn> {
    let value = single_value(rows)?;
    Lsn::from_str(value).map_err(|e| PgError::Parse(e.to_string()))
}

// ============================================================================
// Multi-column parsers
// ============================================================================

/// A standby's sync state paired with the primary's current LSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStateAndLsn {
    pub sync_state: ReplicationState,
    pub current_lsn: Lsn,
}

/// Parses a `(sync_state, lsn)` row.
///
/// Returns `None` for an empty result set, which the sync-state query
/// produces when no standby is attached; the caller decides whether
/// that is an error.
pub fn parse_sync_state_and_lsn(rows: &Rows) -> PgResult<Option<SyncStateAndLsn>> {
    match rows.len() {
        0 => Ok(None),
        1 => {
            let row = &rows[0];
            if row.len() != 2 {
                return Err(PgError::Parse(format!(
                    "expected 2 columns, got {}",
                    row.len()
                )));
            }
            let sync_state = ReplicationState::from_sync_state(row[0].as_deref().unwrap_or(""));
            let lsn_text = row[1]
                .as_deref()
                .ok_or_else(|| PgError::Parse("null lsn".into()))?;
            let current_lsn =
                Lsn::from_str(lsn_text).map_err(|e| PgError::Parse(e.to_string()))?;
            Ok(Some(SyncStateAndLsn {
                sync_state,
                current_lsn,
            }))
        }
        n => Err(PgError::Parse(format!("expected at most 1 row, got {n}"))),
    }
}

/// A `(host, port, node_id)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPortId {
    pub host: String,
    pub port: u16,
    pub node_id: NodeId,
}

/// Parses a `(host, port, node_id)` row.
pub fn parse_host_port_id(row: &[Option<String>]) -> PgResult<HostPortId> {
    if row.len() != 3 {
        return Err(PgError::Parse(format!(
            "expected 3 columns, got {}",
            row.len()
        )));
    }
    let host = row[0]
        .as_deref()
        .ok_or_else(|| PgError::Parse("null host".into()))?
        .to_string();
    let port = row[1]
        .as_deref()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| PgError::Parse("bad port".into()))?;
    let node_id = row[2]
        .as_deref()
        .and_then(|id| id.parse().ok())
        .map(NodeId::new)
        .ok_or_else(|| PgError::Parse("bad node id".into()))?;
    Ok(HostPortId {
        host,
        port,
        node_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(value: &str) -> Rows {
        vec![vec![Some(value.to_string())]]
    }

    #[test]
    fn bool_values() {
        assert!(parse_bool(&one("t")).unwrap());
        assert!(!parse_bool(&one("f")).unwrap());
        assert!(parse_bool(&one("maybe")).is_err());
    }

    #[test]
    fn int_values() {
        assert_eq!(parse_int(&one("-42")).unwrap(), -42);
        assert!(parse_int(&one("12.5")).is_err());
    }

    #[test]
    fn bigint_values_use_the_full_unsigned_range() {
        // a realistic system identifier, larger than i64::MAX
        assert_eq!(
            parse_bigint(&one("18446744073709551615")).unwrap(),
            u64::MAX
        );
        assert_eq!(parse_bigint(&one("7215387261823671875")).unwrap(), 7215387261823671875);
        assert!(parse_bigint(&one("-1")).is_err());
    }

    #[test]
    fn bigint_does_not_degrade_to_string() {
        // a non-numeric value must fail, not come back as a string
        assert!(parse_bigint(&one("not-a-number")).is_err());
    }

    #[test]
    fn null_and_shape_mismatches_fail() {
        assert!(parse_string(&vec![vec![None]]).is_err());
        assert!(parse_bool(&Vec::new()).is_err());
        assert!(parse_int(&vec![vec![Some("1".into()), Some("2".into())]]).is_err());
    }

    #[test]
    fn lsn_values() {
        assert_eq!(
            parse_lsn(&one("0/1000")).unwrap(),
            Lsn::new(0x1000)
        );
        assert!(parse_lsn(&one("nope")).is_err());
    }

    #[test]
    fn sync_state_and_lsn_rows() {
        let rows: Rows = vec![vec![Some("quorum".into()), Some("16/B374D848".into())]];
        let parsed = parse_sync_state_and_lsn(&rows).unwrap().unwrap();
        assert_eq!(parsed.sync_state, ReplicationState::Quorum);
        assert_eq!(parsed.current_lsn.to_string(), "16/B374D848");

        // no attached standby: empty result, not an error
        assert_eq!(parse_sync_state_and_lsn(&Vec::new()).unwrap(), None);

        // null sync_state still yields the LSN
        let rows: Rows = vec![vec![None, Some("0/2000".into())]];
        let parsed = parse_sync_state_and_lsn(&rows).unwrap().unwrap();
        assert_eq!(parsed.sync_state, ReplicationState::Unknown);
    }

    #[test]
    fn host_port_id_rows() {
        let row = vec![
            Some("10.0.0.5".to_string()),
            Some("5432".to_string()),
            Some("7".to_string()),
        ];
        let parsed = parse_host_port_id(&row).unwrap();
        assert_eq!(parsed.host, "10.0.0.5");
        assert_eq!(parsed.port, 5432);
        assert_eq!(parsed.node_id, NodeId::new(7));

        assert!(parse_host_port_id(&[None, None, None]).is_err());
    }
}
