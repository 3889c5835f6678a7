//! Monotonic nanosecond clocks.
//!
//! Probe send and receive times must come from the same clock for a delay to
//! mean anything, so sender and listener share one `Arc<dyn Clock>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Source of monotonic timestamps in nanoseconds
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> i64;
}

/// Nanoseconds elapsed since the clock was created
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to.
/// Clones share the same reading.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_ns: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now_ns: Arc::new(AtomicI64::new(start_ns)),
        }
    }

    pub fn set(&self, now_ns: i64) {
        self.now_ns.store(now_ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_ns();
        for _ in 0..1000 {
            let now = clock.now_ns();
            assert!(now >= last, "{now} < {last}");
            last = now;
        }
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1000);
        let other = clock.clone();
        other.advance(500);
        assert_eq!(clock.now_ns(), 1500);
        clock.set(3);
        assert_eq!(other.now_ns(), 3);
    }
}
