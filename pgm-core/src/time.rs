//! Monotonic time source.
//!
//! `PGM_TIMER`/`PGM_SLEEP` historically selected among several OS clock and sleep
//! primitives (`clock_gettime`, `ftime`, `gettimeofday`, `/dev/rtc`, TSC). Mixing wall-clock
//! and monotonic deadlines is unsound, so this crate only ever exposes one monotonic source
//! (`std::time::Instant`); the env vars are recognised for compatibility but do not change
//! the underlying clock. See DESIGN.md for the rationale.

use std::time::{Duration, Instant};

/// Deadlines and "now" are expressed as this absolute monotonic instant.
pub type Deadline = Instant;

/// Abstraction over "what time is it" so the timer engine and windows can be tested with a
/// fake clock without sleeping in real time.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default clock: wraps `std::time::Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl ClockSource for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl MonotonicClock {
    /// Recognise `PGM_TIMER`'s first-letter clock selector for compatibility; always backs
    /// onto the process monotonic clock regardless of the requested source.
    pub fn from_env() -> Self {
        if let Ok(v) = std::env::var("PGM_TIMER") {
            tracing::debug!(selector = %v, "PGM_TIMER recognised; monotonic clock used regardless");
        }
        MonotonicClock
    }
}

/// A clock whose `now` can be advanced manually, for deterministic tests of back-off/NCF/
/// RDATA/expiry timers.
#[derive(Debug)]
pub struct TestClock {
    base: Instant,
    offset: std::sync::atomic::AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.offset
            .fetch_add(d.as_nanos() as u64, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for TestClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_millis(50));
        assert!(clock.now() >= t0 + Duration::from_millis(50));
    }
}
