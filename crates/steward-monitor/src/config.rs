//! Monitor configuration.
//!
//! Thresholds driving the assignment rules. These are part of every
//! decision, so they are explicit values rather than ambient constants,
//! and the simulation profile shrinks them for fast tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds for the rules engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long a node may stay silent (no `node_active`, no successful
    /// probe) before it can be declared lost.
    pub network_partition_timeout: Duration,

    /// How long a lost primary stays in `demote_timeout` before the
    /// monitor considers it demoted.
    pub demote_timeout: Duration,

    /// How close (in WAL bytes) a catching-up standby must be to the
    /// primary before it is promoted to `secondary`.
    pub catchup_slack_bytes: u64,

    /// How often the monitor runs its independent health probes.
    pub health_check_interval: Duration,
}

impl MonitorConfig {
    /// Production thresholds.
    pub fn production() -> Self {
        Self {
            network_partition_timeout: Duration::from_secs(20),
            demote_timeout: Duration::from_secs(30),
            catchup_slack_bytes: 16 * 1024 * 1024,
            health_check_interval: Duration::from_secs(5),
        }
    }

    /// Thresholds for simulation testing: short enough that scenarios
    /// run in simulated milliseconds.
    pub fn simulation() -> Self {
        Self {
            network_partition_timeout: Duration::from_millis(200),
            demote_timeout: Duration::from_millis(300),
            catchup_slack_bytes: 4096,
            health_check_interval: Duration::from_millis(50),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::production()
    }
}
