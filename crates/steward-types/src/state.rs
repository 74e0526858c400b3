//! Failover state machine states.
//!
//! [`NodeState`] is the closed set of states a node moves through during
//! its life-cycle. The monitor assigns goal states; the keeper reports
//! the state it reached. Both sides speak the same enum.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a state or replication-state keyword.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown state keyword: {0:?}")]
pub struct StateParseError(pub String);

// ============================================================================
// Node State
// ============================================================================

/// A state in the failover state machine.
///
/// The full life-cycle lives in a single FSM: a node changes role over
/// time (a standby gets promoted, a failed primary rejoins as standby),
/// so primary-only and standby-only states share the one enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Just registered, nothing decided yet.
    Init,
    /// Sole node of its group, writable, no replication.
    Single,
    /// Writable primary without synchronous replication fencing, waiting
    /// for a standby to be ready.
    WaitPrimary,
    /// Writable primary with synchronous replication enabled.
    Primary,
    /// Writable primary while a new standby joins the group.
    JoinPrimary,
    /// Writable primary re-applying changed replication settings.
    ApplySettings,
    /// New standby waiting for the primary to accept it.
    WaitStandby,
    /// Standby rebuilding or catching up with the primary.
    Catchingup,
    /// Healthy streaming replica, eligible for promotion.
    Secondary,
    /// Election winner draining traffic off the old primary.
    PreparePromotion,
    /// Election winner cutting replication before promoting.
    StopReplication,
    /// Standby asked to suspend for maintenance, preparing.
    WaitMaintenance,
    /// Standby suspended for manual maintenance.
    Maintenance,
    /// Old primary refusing new writes while standbys drain.
    Draining,
    /// Lost primary being timed out before demotion completes.
    DemoteTimeout,
    /// Former primary, fully demoted.
    Demoted,
    /// Fenced: stop accepting writes immediately.
    Demote,
    /// Reporting the current WAL position for an election.
    ReportLsn,
    /// Election loser reattaching to the new primary.
    JoinSecondary,
    /// Election winner fetching WAL it is missing before promotion.
    FastForward,
    /// Removed from the formation. Terminal.
    Dropped,
}

impl NodeState {
    /// Every state, in declaration order.
    pub const ALL: [NodeState; 21] = [
        NodeState::Init,
        NodeState::Single,
        NodeState::WaitPrimary,
        NodeState::Primary,
        NodeState::JoinPrimary,
        NodeState::ApplySettings,
        NodeState::WaitStandby,
        NodeState::Catchingup,
        NodeState::Secondary,
        NodeState::PreparePromotion,
        NodeState::StopReplication,
        NodeState::WaitMaintenance,
        NodeState::Maintenance,
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
        NodeState::Demote,
        NodeState::ReportLsn,
        NodeState::JoinSecondary,
        NodeState::FastForward,
        NodeState::Dropped,
    ];

    /// Returns true if a node in this state may accept client writes.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            NodeState::Single
                | NodeState::WaitPrimary
                | NodeState::Primary
                | NodeState::JoinPrimary
                | NodeState::ApplySettings
        )
    }

    /// Returns true if this state belongs to the primary lineage.
    ///
    /// A node is allowed to *report* `primary` only while its goal is in
    /// this lineage; anything else is a divergence the monitor fences.
    pub fn is_primary_lineage(&self) -> bool {
        matches!(
            self,
            NodeState::Primary
                | NodeState::WaitPrimary
                | NodeState::JoinPrimary
                | NodeState::ApplySettings
        )
    }

    /// Returns true if this state is part of the demotion path.
    pub fn is_being_demoted(&self) -> bool {
        matches!(
            self,
            NodeState::Draining | NodeState::DemoteTimeout | NodeState::Demoted | NodeState::Demote
        )
    }

    /// Returns true if this is the terminal state.
    pub fn is_dropped(&self) -> bool {
        matches!(self, NodeState::Dropped)
    }

    /// The canonical keyword for this state, as used on the wire and in
    /// events.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Init => "init",
            NodeState::Single => "single",
            NodeState::WaitPrimary => "wait_primary",
            NodeState::Primary => "primary",
            NodeState::JoinPrimary => "join_primary",
            NodeState::ApplySettings => "apply_settings",
            NodeState::WaitStandby => "wait_standby",
            NodeState::Catchingup => "catchingup",
            NodeState::Secondary => "secondary",
            NodeState::PreparePromotion => "prepare_promotion",
            NodeState::StopReplication => "stop_replication",
            NodeState::WaitMaintenance => "wait_maintenance",
            NodeState::Maintenance => "maintenance",
            NodeState::Draining => "draining",
            NodeState::DemoteTimeout => "demote_timeout",
            NodeState::Demoted => "demoted",
            NodeState::Demote => "demote",
            NodeState::ReportLsn => "report_lsn",
            NodeState::JoinSecondary => "join_secondary",
            NodeState::FastForward => "fast_forward",
            NodeState::Dropped => "dropped",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| StateParseError(s.to_string()))
    }
}

// ============================================================================
// Replication State
// ============================================================================

/// The `sync_state` a primary reports for a standby's WAL sender, as
/// observed by the keeper in `pg_stat_replication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationState {
    /// Asynchronous replication, or none established yet.
    Async,
    /// Synchronous standby.
    Sync,
    /// Member of a synchronous quorum (`ANY n` standby names).
    Quorum,
    /// Not reported or not recognized.
    #[default]
    Unknown,
}

impl ReplicationState {
    /// Returns true if the standby participates in synchronous commit.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, ReplicationState::Sync | ReplicationState::Quorum)
    }

    /// The canonical keyword for this replication state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationState::Async => "async",
            ReplicationState::Sync => "sync",
            ReplicationState::Quorum => "quorum",
            ReplicationState::Unknown => "unknown",
        }
    }

    /// Parses a `pg_stat_replication.sync_state` value.
    ///
    /// Anything unrecognized (including the empty string a primary
    /// reports when no standby is attached) maps to `Unknown` rather
    /// than an error: the field is advisory.
    pub fn from_sync_state(s: &str) -> Self {
        match s {
            "async" => ReplicationState::Async,
            "sync" => ReplicationState::Sync,
            "quorum" => ReplicationState::Quorum,
            _ => ReplicationState::Unknown,
        }
    }
}

impl std::fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Health
// ============================================================================

/// Result of the monitor's independent health probe of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Never probed yet.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Good,
    /// Last probe failed.
    Bad,
}

impl Health {
    /// Returns true if the last probe failed.
    pub fn is_bad(&self) -> bool {
        matches!(self, Health::Bad)
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Unknown => f.write_str("unknown"),
            Health::Good => f.write_str("good"),
            Health::Bad => f.write_str("bad"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn writable_states() {
        let writable: Vec<_> = NodeState::ALL
            .iter()
            .filter(|s| s.is_writable())
            .collect();
        assert_eq!(
            writable,
            vec![
                &NodeState::Single,
                &NodeState::WaitPrimary,
                &NodeState::Primary,
                &NodeState::JoinPrimary,
                &NodeState::ApplySettings,
            ]
        );
    }

    #[test]
    fn every_state_round_trips_through_keyword() {
        for state in NodeState::ALL {
            assert_eq!(NodeState::from_str(state.as_str()), Ok(state));
        }
    }

    #[test]
    fn unknown_keyword_is_an_error() {
        assert!(NodeState::from_str("wait_primary ").is_err());
        assert!(NodeState::from_str("PRIMARY").is_err());
    }

    #[test]
    fn sync_state_parsing_is_forgiving() {
        assert_eq!(
            ReplicationState::from_sync_state("sync"),
            ReplicationState::Sync
        );
        assert_eq!(
            ReplicationState::from_sync_state("quorum"),
            ReplicationState::Quorum
        );
        assert_eq!(
            ReplicationState::from_sync_state(""),
            ReplicationState::Unknown
        );
        assert_eq!(
            ReplicationState::from_sync_state("potential"),
            ReplicationState::Unknown
        );
    }

    #[test]
    fn primary_lineage_is_writable_minus_single() {
        for state in NodeState::ALL {
            if state.is_primary_lineage() {
                assert!(state.is_writable());
            }
        }
        assert!(NodeState::Single.is_writable());
        assert!(!NodeState::Single.is_primary_lineage());
    }
}
