//! The keeper-side transition table.
//!
//! The monitor decides *what* state a node should be in; this table
//! decides *how* to get there from the state the node is in now. One
//! row per supported `(current, assigned)` pair, each with the action
//! the keeper runs and the comment that shows up in the logs.
//!
//! A pair with no row is unreachable by construction on the monitor
//! side; hitting one anyway is a fatal error rather than a guess.

use steward_types::NodeState;

use crate::error::{KeeperError, KeeperResult};

/// What a transition does to the local database.
///
/// Actions are idempotent: re-running a half-applied transition after
/// a crash converges to the same result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Nothing to do locally; reporting the new state is enough.
    None,
    /// Ensure the cluster is initialized, started, and writable.
    InitAsPrimary,
    /// Create the replication slot and open access for the standby.
    PrepareReplication,
    /// Drop replication machinery and run standalone again.
    DisableReplication,
    /// Set `synchronous_standby_names` and reload.
    EnableSyncRep,
    /// Clear `synchronous_standby_names`, unblock waiting backends.
    DisableSyncRep,
    /// Stop the server.
    StopPostgres,
    /// Start the server and accept writes again.
    ResumeAsPrimary,
    /// Clone the primary and start as its standby.
    InitAsStandby,
    /// Rewind onto the new primary, re-clone if the rewind fails.
    RewindOrInit,
    /// Make sure all received WAL is replayed before promotion.
    PreparePromotion,
    /// Cut the replication stream without promoting yet.
    StopReplication,
    /// Promote and wait until the server leaves recovery.
    PromoteStandby,
    /// Replay locally available WAL to align with the winner.
    FastForward,
    /// Reattach to whoever is primary now.
    JoinSecondary,
    /// Stop the server for manual maintenance.
    StartMaintenance,
    /// Start following the current primary again after maintenance.
    RestartStandby,
    /// Stop the server and forget this node's local state.
    DropNode,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub current: NodeState,
    pub assigned: NodeState,
    pub comment: &'static str,
    pub action: TransitionAction,
}

const fn row(
    current: NodeState,
    assigned: NodeState,
    comment: &'static str,
    action: TransitionAction,
) -> Transition {
    Transition {
        current,
        assigned,
        comment,
        action,
    }
}

use NodeState::*;
use TransitionAction as A;

/// The full life-cycle in one table: primary-only and standby-only
/// states share it because every node changes role over its lifetime.
pub const KEEPER_FSM: &[Transition] = &[
    // starting out
    row(Init, Single, "Start as a single node", A::InitAsPrimary),
    row(Init, WaitStandby, "Start following a primary", A::None),
    // the other node was forcibly removed
    row(Primary, Single, "Other node was forcibly removed, now single", A::DisableReplication),
    row(WaitPrimary, Single, "Other node was forcibly removed, now single", A::DisableReplication),
    row(JoinPrimary, Single, "Other node was forcibly removed, now single", A::DisableReplication),
    row(ApplySettings, Single, "Other node was forcibly removed, now single", A::DisableReplication),
    // failover demotes the primary
    row(Primary, Draining, "A failover occurred, stopping writes", A::StopPostgres),
    row(Draining, DemoteTimeout, "Secondary confirms it's receiving no more writes", A::StopPostgres),
    row(DemoteTimeout, Demoted, "Demote timeout expired", A::StopPostgres),
    row(Primary, DemoteTimeout, "A failover occurred, no longer primary", A::StopPostgres),
    row(Primary, Demoted, "A failover occurred, no longer primary", A::StopPostgres),
    row(Draining, Demoted, "Demoted after a failover, no longer primary", A::StopPostgres),
    // fencing
    row(Primary, Demote, "Fenced by the monitor, stopping writes", A::StopPostgres),
    row(WaitPrimary, Demote, "Fenced by the monitor, stopping writes", A::StopPostgres),
    row(Single, Demote, "Fenced by the monitor, stopping writes", A::StopPostgres),
    row(JoinPrimary, Demote, "Fenced by the monitor, stopping writes", A::StopPostgres),
    row(ApplySettings, Demote, "Fenced by the monitor, stopping writes", A::StopPostgres),
    row(Demote, Demoted, "Fencing complete", A::StopPostgres),
    // was demoted, standby got removed: resume as the writable node
    row(Demoted, Single, "Was demoted after a failure, but secondary was forcibly removed", A::ResumeAsPrimary),
    row(DemoteTimeout, Single, "Was demoted after a failure, but secondary was forcibly removed", A::ResumeAsPrimary),
    row(Draining, Single, "Was demoted after a failure, but secondary was forcibly removed", A::ResumeAsPrimary),
    // the primary was forcibly removed: promote ourselves
    row(Secondary, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(Catchingup, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(PreparePromotion, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(ReportLsn, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(JoinSecondary, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(FastForward, Single, "Primary was forcibly removed", A::PromoteStandby),
    row(WaitStandby, Single, "Primary was removed before the clone started", A::InitAsPrimary),
    row(Demote, Single, "Was fenced, but the other node was forcibly removed", A::ResumeAsPrimary),
    row(WaitMaintenance, Single, "Maintenance cancelled, the other node was forcibly removed", A::ResumeAsPrimary),
    row(Maintenance, Single, "Maintenance cancelled, the other node was forcibly removed", A::ResumeAsPrimary),
    row(StopReplication, Single, "Went down to force the primary to time out, but then it was removed", A::PromoteStandby),
    // a standby appears next to the writable node
    row(Single, WaitPrimary, "A new secondary was added", A::PrepareReplication),
    row(Primary, WaitPrimary, "Secondary became unhealthy", A::DisableSyncRep),
    row(JoinPrimary, WaitPrimary, "Standby went away while joining", A::DisableSyncRep),
    row(ApplySettings, WaitPrimary, "Replication settings applied", A::DisableSyncRep),
    row(StopReplication, WaitPrimary, "Confirmed promotion with the monitor", A::PromoteStandby),
    row(PreparePromotion, WaitPrimary, "Promoting after writes were blocked", A::PromoteStandby),
    // the situation is back to normal
    row(WaitPrimary, Primary, "A healthy secondary appeared", A::EnableSyncRep),
    row(JoinPrimary, Primary, "Standby joined the group", A::EnableSyncRep),
    row(ApplySettings, Primary, "Replication settings applied", A::None),
    // a newcomer joins a running primary
    row(Primary, JoinPrimary, "A new standby is joining", A::PrepareReplication),
    row(WaitPrimary, JoinPrimary, "A new standby is joining", A::PrepareReplication),
    // replication settings changed
    row(Primary, ApplySettings, "Applying changed replication settings", A::EnableSyncRep),
    // standby life-cycle
    row(WaitStandby, Catchingup, "The primary is now ready to accept a standby", A::InitAsStandby),
    row(Demoted, Catchingup, "A new primary is available. First, try to rewind. If that fails, do a pg_basebackup.", A::RewindOrInit),
    row(Secondary, Catchingup, "Standby fell behind, catching up again", A::None),
    row(Catchingup, Secondary, "Caught up with the primary", A::None),
    // election participation
    row(Secondary, ReportLsn, "Reporting the current WAL position", A::None),
    row(Catchingup, ReportLsn, "Reporting the current WAL position", A::None),
    row(WaitStandby, ReportLsn, "Reporting the current WAL position", A::None),
    row(JoinSecondary, ReportLsn, "Reporting the current WAL position", A::None),
    // the winner's promotion ladder
    row(ReportLsn, PreparePromotion, "Stop traffic to primary, wait for it to finish draining", A::PreparePromotion),
    row(Secondary, PreparePromotion, "Stop traffic to primary, wait for it to finish draining", A::PreparePromotion),
    row(Catchingup, PreparePromotion, "Stop traffic to primary, wait for it to finish draining", A::PreparePromotion),
    row(PreparePromotion, StopReplication, "Prevent against split-brain situations", A::StopReplication),
    // the losers' path to the new primary; the monitor may decide the
    // election before a slow keeper ever reported report_lsn
    row(ReportLsn, FastForward, "Rewinding to align with the new primary's timeline", A::FastForward),
    row(Secondary, FastForward, "Rewinding to align with the new primary's timeline", A::FastForward),
    row(Catchingup, FastForward, "Rewinding to align with the new primary's timeline", A::FastForward),
    row(JoinSecondary, FastForward, "Rewinding to align with the new primary's timeline", A::FastForward),
    row(ReportLsn, JoinSecondary, "A new primary has been elected, joining as a standby", A::JoinSecondary),
    row(Secondary, JoinSecondary, "A new primary has been elected, joining as a standby", A::JoinSecondary),
    row(Catchingup, JoinSecondary, "A new primary has been elected, joining as a standby", A::JoinSecondary),
    row(FastForward, JoinSecondary, "Fetched missing WAL, ready to follow the new primary", A::JoinSecondary),
    row(FastForward, ReportLsn, "Reporting the current WAL position", A::None),
    row(JoinSecondary, Secondary, "Following the new primary", A::None),
    // maintenance
    row(Secondary, WaitMaintenance, "Suspending standby for manual maintenance", A::StartMaintenance),
    row(Catchingup, WaitMaintenance, "Suspending standby for manual maintenance", A::StartMaintenance),
    row(Demoted, WaitMaintenance, "Suspending for manual maintenance after demotion", A::StartMaintenance),
    row(WaitMaintenance, Maintenance, "Standby is now in maintenance", A::None),
    row(Maintenance, Catchingup, "Restarting standby after manual maintenance is done", A::RestartStandby),
];

/// Finds the transition row for a `(current, assigned)` pair.
///
/// Any state may be told to drop; that path is uniform and not
/// enumerated per row.
pub fn find_transition(current: NodeState, assigned: NodeState) -> KeeperResult<Transition> {
    if assigned == NodeState::Dropped {
        return Ok(row(
            current,
            NodeState::Dropped,
            "Node removed from the formation",
            A::DropNode,
        ));
    }
    KEEPER_FSM
        .iter()
        .find(|t| t.current == current && t.assigned == assigned)
        .copied()
        .ok_or(KeeperError::NoTransitionPath {
            from: current,
            to: assigned,
        })
}

/// The states reachable from `current`, with their comments. Handy for
/// operators wondering what the keeper might do next.
pub fn reachable_from(current: NodeState) -> Vec<(NodeState, &'static str)> {
    KEEPER_FSM
        .iter()
        .filter(|t| t.current == current)
        .map(|t| (t.assigned, t.comment))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_steady_paths_have_rows() {
        for (from, to) in [
            (Init, Single),
            (Single, WaitPrimary),
            (WaitPrimary, Primary),
            (Primary, WaitPrimary),
            (WaitStandby, Catchingup),
            (Catchingup, Secondary),
            (Secondary, ReportLsn),
            (ReportLsn, PreparePromotion),
            (PreparePromotion, StopReplication),
            (StopReplication, WaitPrimary),
            (Demoted, Catchingup),
        ] {
            assert!(find_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn every_state_can_be_dropped() {
        for state in NodeState::ALL {
            let t = find_transition(state, Dropped).unwrap();
            assert_eq!(t.action, A::DropNode);
        }
    }

    #[test]
    fn unsupported_pairs_are_fatal() {
        let err = find_transition(Maintenance, Primary).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn no_duplicate_rows() {
        for (i, a) in KEEPER_FSM.iter().enumerate() {
            for b in &KEEPER_FSM[i + 1..] {
                assert!(
                    !(a.current == b.current && a.assigned == b.assigned),
                    "duplicate row {} -> {}",
                    a.current,
                    a.assigned
                );
            }
        }
    }

    #[test]
    fn reachable_from_lists_the_candidates() {
        let reachable = reachable_from(Secondary);
        assert!(reachable.iter().any(|(to, _)| *to == ReportLsn));
        assert!(reachable.iter().any(|(to, _)| *to == PreparePromotion));
        assert!(reachable.iter().any(|(to, _)| *to == WaitMaintenance));
    }
}
