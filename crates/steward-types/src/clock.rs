//! Time, injectable for deterministic tests.
//!
//! Every "is the primary lost?" decision is a pure function of the
//! catalog snapshot and a [`Timestamp`] obtained from a [`Clock`]. The
//! production clock reads the system time; the simulation clock in
//! `steward-sim` advances only when told to.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// Timestamp
// ============================================================================

/// A wall-clock instant with nanosecond precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since the Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from seconds since the Unix epoch.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns nanoseconds since the Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns whole seconds since the Unix epoch.
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// The time elapsed since an earlier instant.
    ///
    /// Returns zero if `earlier` is in the future; the monitor never
    /// wants a negative age.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// This instant moved forward by a duration, saturating.
    pub fn plus(&self, delta: Duration) -> Timestamp {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(nanos))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.as_secs(), self.0 % 1_000_000_000)
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time.
///
/// The monitor and the keeper take an `Arc<dyn Clock>` so that tests can
/// drive time explicitly.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// The production clock, backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp::from_nanos(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_zero() {
        assert_eq!(Timestamp::EPOCH.as_nanos(), 0);
        assert_eq!(Timestamp::EPOCH.as_secs(), 0);
    }

    #[test]
    fn since_saturates_at_zero() {
        let earlier = Timestamp::from_secs(10);
        let later = Timestamp::from_secs(30);
        assert_eq!(later.since(earlier), Duration::from_secs(20));
        assert_eq!(earlier.since(later), Duration::ZERO);
    }

    #[test]
    fn plus_advances() {
        let t = Timestamp::from_secs(5).plus(Duration::from_millis(500));
        assert_eq!(t.as_nanos(), 5_500_000_000);
    }

    #[test]
    fn system_clock_is_past_2020() {
        let now = SystemClock.now();
        assert!(now.as_secs() > 1_577_836_800);
    }
}
