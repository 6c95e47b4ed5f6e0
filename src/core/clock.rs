//! Wall-clock source for advisory timestamps.
//!
//! Timestamps on channel state are informational only; ordering always
//! comes from the nonce. The clock is injected so replicas can be driven
//! deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of millisecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start)) }
    }

    /// Move time forward.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance(500);
        assert_eq!(other.now_millis(), 1_500);
    }

    #[test]
    fn test_system_clock_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
