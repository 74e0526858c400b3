//! The simulated clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steward_types::{Clock, Timestamp};

/// A clock that advances only when told to.
///
/// Clone handles share the same time, so the monitor, every keeper and
/// the test itself observe one consistent timeline.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now_ns: Arc<AtomicU64>,
}

impl SimClock {
    /// Creates a clock at an arbitrary nonzero starting point.
    pub fn new() -> Self {
        let clock = Self::default();
        // keep zero free so "never happened" timestamps stay distinct
        clock.now_ns.store(1_000_000_000, Ordering::SeqCst);
        clock
    }

    /// Advances the clock.
    pub fn advance(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }
}
