//! The keeper's handle to the monitor.
//!
//! The keeper never sees catalog internals; everything it knows about
//! the rest of the group comes through this trait. The production
//! implementation calls the monitor's stored functions over a database
//! connection; the simulation harness wires the trait straight to an
//! in-process monitor.

use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::debug;

use steward_pgsql::{value, ConnInfo, PgClient, PgError, PgExecutor, RetryPolicy};
use steward_types::protocol::{
    NodeActiveParams, NodeActiveRow, NodeAddressRow, OtherNodeRow, RegisterParams, RegistrationRow,
};
use steward_types::{CandidatePriority, GroupId, Lsn, NodeId, NodeName, NodeState};

use crate::error::{KeeperError, KeeperResult};

/// Operations the keeper invokes on the monitor.
pub trait MonitorClient {
    /// Registers this node with the monitor.
    fn register_node(&mut self, params: &RegisterParams) -> KeeperResult<RegistrationRow>;

    /// The heartbeat: report observed state, receive the goal state.
    fn node_active(&mut self, params: &NodeActiveParams) -> KeeperResult<NodeActiveRow>;

    /// The current writable node of this keeper's group.
    fn get_primary(&mut self) -> KeeperResult<NodeAddressRow>;

    /// The other members of this keeper's group.
    fn get_other_nodes(&mut self, node_id: NodeId) -> KeeperResult<Vec<OtherNodeRow>>;
}

// ============================================================================
// SQL implementation
// ============================================================================

/// Monitor client speaking SQL to the monitor database.
///
/// Each call opens a short-lived connection with the bounded retry
/// policy; the monitor's stored functions live in the `steward` schema.
pub struct PgMonitorClient {
    monitor: ConnInfo,
    formation: steward_types::FormationId,
    group_id: GroupId,
    policy: RetryPolicy,
    stop: Arc<AtomicBool>,
}

impl PgMonitorClient {
    /// Creates a client for the given monitor connection string.
    pub fn new(
        monitor_conninfo: &str,
        formation: steward_types::FormationId,
        group_id: GroupId,
        policy: RetryPolicy,
        stop: Arc<AtomicBool>,
    ) -> KeeperResult<Self> {
        let monitor = ConnInfo::parse(monitor_conninfo)?;
        Ok(Self {
            monitor,
            formation,
            group_id,
            policy,
            stop,
        })
    }

    fn connect(&self) -> KeeperResult<PgClient> {
        PgClient::connect_with_retry(&self.monitor, &self.policy, &self.stop)
            .map_err(KeeperError::MonitorUnreachable)
    }

    /// Distinguishes transport failures (retry) from the monitor's
    /// named logical errors (surface to the operator).
    fn map_call_error(err: PgError) -> KeeperError {
        match err {
            PgError::Connect { .. } | PgError::RetriesExhausted { .. } => {
                KeeperError::MonitorUnreachable(err)
            }
            PgError::Command { ref message, .. } => KeeperError::MonitorLogical(message.clone()),
            other => KeeperError::Postgres(other),
        }
    }
}

fn parse_state(text: &str) -> KeeperResult<NodeState> {
    NodeState::from_str(text)
        .map_err(|e| KeeperError::MonitorLogical(format!("unexpected state keyword: {e}")))
}

fn column<'a>(row: &'a [Option<String>], index: usize, what: &str) -> KeeperResult<&'a str> {
    row.get(index)
        .and_then(|c| c.as_deref())
        .ok_or_else(|| KeeperError::MonitorLogical(format!("missing {what} in monitor reply")))
}

impl MonitorClient for PgMonitorClient {
    fn register_node(&mut self, params: &RegisterParams) -> KeeperResult<RegistrationRow> {
        let mut client = self.connect()?;
        let port = params.port.to_string();
        let sysid = params
            .system_identifier
            .map(|s| s.as_u64().to_string())
            .unwrap_or_default();
        let priority = params
            .candidate_priority
            .map(|p| p.as_u8().to_string())
            .unwrap_or_default();
        let quorum = params
            .replication_quorum
            .map(|q| if q { "t" } else { "f" })
            .unwrap_or("");

        let rows = client
            .query(
                "SELECT node_id::text, group_id::text, assigned_state::text, \
                        candidate_priority::text, replication_quorum::text, node_name \
                   FROM steward.register_node($1, $2, $3, $4, \
                        nullif($5, '')::bigint, nullif($6, '')::int, nullif($7, '')::bool)",
                &[
                    self.formation.as_str(),
                    &params.host,
                    &port,
                    &params.dbname,
                    &sysid,
                    &priority,
                    quorum,
                ],
            )
            .map_err(Self::map_call_error)?;

        let row = rows
            .first()
            .ok_or_else(|| KeeperError::MonitorLogical("empty register_node reply".into()))?;
        debug!(?row, "register_node reply");
        Ok(RegistrationRow {
            node_id: NodeId::new(
                column(row, 0, "node_id")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad node_id".into()))?,
            ),
            group_id: GroupId::new(
                column(row, 1, "group_id")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad group_id".into()))?,
            ),
            assigned_state: parse_state(column(row, 2, "assigned_state")?)?,
            candidate_priority: CandidatePriority::new(
                column(row, 3, "candidate_priority")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad priority".into()))?,
            ),
            replication_quorum: column(row, 4, "replication_quorum")? == "t",
            node_name: NodeName::new(column(row, 5, "node_name")?),
        })
    }

    fn node_active(&mut self, params: &NodeActiveParams) -> KeeperResult<NodeActiveRow> {
        let mut client = self.connect()?;
        let node_id = params.node_id.as_u64().to_string();
        let group_id = params.group_id.as_u64().to_string();
        let lsn = params.reported_lsn.to_string();
        let running = if params.pg_is_running { "t" } else { "f" };
        let sysid = params
            .system_identifier
            .map(|s| s.as_u64().to_string())
            .unwrap_or_default();

        let rows = client
            .query(
                "SELECT assigned_node_id::text, assigned_group_id::text, \
                        assigned_goal_state::text, assigned_priority::text, \
                        assigned_quorum::text \
                   FROM steward.node_active($1, $2, $3, $4, $5::pg_lsn, $6::bool, $7, \
                        nullif($8, '')::bigint)",
                &[
                    params.formation.as_str(),
                    &node_id,
                    &group_id,
                    params.reported_state.as_str(),
                    &lsn,
                    running,
                    params.replication_state.as_str(),
                    &sysid,
                ],
            )
            .map_err(Self::map_call_error)?;

        let row = rows
            .first()
            .ok_or_else(|| KeeperError::MonitorLogical("empty node_active reply".into()))?;
        Ok(NodeActiveRow {
            node_id: NodeId::new(
                column(row, 0, "node_id")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad node_id".into()))?,
            ),
            group_id: GroupId::new(
                column(row, 1, "group_id")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad group_id".into()))?,
            ),
            assigned_state: parse_state(column(row, 2, "assigned_goal_state")?)?,
            candidate_priority: CandidatePriority::new(
                column(row, 3, "assigned_priority")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad priority".into()))?,
            ),
            replication_quorum: column(row, 4, "assigned_quorum")? == "t",
        })
    }

    fn get_primary(&mut self) -> KeeperResult<NodeAddressRow> {
        let mut client = self.connect()?;
        let group_id = self.group_id.as_u64().to_string();
        let rows = client
            .query(
                "SELECT node_id::text, node_name, host, port::text \
                   FROM steward.get_primary($1, $2)",
                &[self.formation.as_str(), &group_id],
            )
            .map_err(Self::map_call_error)?;
        let row = rows
            .first()
            .ok_or_else(|| KeeperError::MonitorLogical("empty get_primary reply".into()))?;
        Ok(NodeAddressRow {
            node_id: NodeId::new(
                column(row, 0, "node_id")?
                    .parse()
                    .map_err(|_| KeeperError::MonitorLogical("bad node_id".into()))?,
            ),
            node_name: NodeName::new(column(row, 1, "node_name")?),
            host: column(row, 2, "host")?.to_string(),
            port: column(row, 3, "port")?
                .parse()
                .map_err(|_| KeeperError::MonitorLogical("bad port".into()))?,
        })
    }

    fn get_other_nodes(&mut self, node_id: NodeId) -> KeeperResult<Vec<OtherNodeRow>> {
        let mut client = self.connect()?;
        let id = node_id.as_u64().to_string();
        let rows = client
            .query(
                "SELECT node_id::text, node_name, host, port::text, \
                        reported_lsn::text, is_primary::text \
                   FROM steward.get_other_nodes($1)",
                &[&id],
            )
            .map_err(Self::map_call_error)?;

        rows.iter()
            .map(|row| {
                let address = value::parse_host_port_id(&[
                    row.get(2).cloned().flatten(),
                    row.get(3).cloned().flatten(),
                    row.get(0).cloned().flatten(),
                ])
                .map_err(KeeperError::Postgres)?;
                Ok(OtherNodeRow {
                    node_id: address.node_id,
                    node_name: NodeName::new(column(row, 1, "node_name")?),
                    host: address.host,
                    port: address.port,
                    reported_lsn: Lsn::from_str(column(row, 4, "reported_lsn")?)
                        .map_err(|e| KeeperError::MonitorLogical(e.to_string()))?,
                    is_primary: column(row, 5, "is_primary")? == "t",
                })
            })
            .collect()
    }

}
