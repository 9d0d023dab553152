//! Token-bucket rate regulator: instantaneous refill computed on demand rather
//! than a background ticker, one-second burst capacity equal to the configured rate.
//!
//! Refill-on-access with `f64` fractional token accounting, exposed through a
//! blocking/nonblocking `check`/`remaining` contract rather than a bare `consume`.

use std::time::{Duration, Instant};

pub struct RateBucket {
    capacity: f64,
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// `rate` bytes/sec; burst capacity is one second's worth of `rate`.
    pub fn new(rate: u32) -> Self {
        let rate = rate as f64;
        Self {
            capacity: rate,
            tokens: rate,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Deduct `len + iphdr` tokens if available. Never blocks; callers in blocking mode loop
    /// on `remaining` themselves, retrying after sleeping for the reported duration.
    pub fn check(&mut self, len: usize, iphdr: usize, now: Instant) -> bool {
        self.refill(now);
        let needed = (len + iphdr) as f64;
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Time until `len + iphdr` tokens will be available, zero if already satisfiable.
    pub fn remaining(&mut self, len: usize, iphdr: usize, now: Instant) -> Duration {
        self.refill(now);
        let needed = (len + iphdr) as f64;
        if self.tokens >= needed {
            return Duration::ZERO;
        }
        let deficit = needed - self.tokens;
        Duration::from_secs_f64(deficit / self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_capacity_is_one_second_of_rate() {
        let mut bucket = RateBucket::new(1000);
        let t0 = Instant::now();
        assert!(bucket.check(1000, 0, t0));
        assert!(!bucket.check(1, 0, t0));
    }

    #[test]
    fn tokens_refill_over_elapsed_time() {
        let mut bucket = RateBucket::new(1000);
        let t0 = Instant::now();
        bucket.check(1000, 0, t0);
        let later = t0 + Duration::from_millis(500);
        assert!(bucket.check(500, 0, later));
    }

    #[test]
    fn remaining_reports_wait_for_deficit() {
        let mut bucket = RateBucket::new(1000);
        let t0 = Instant::now();
        bucket.check(1000, 0, t0);
        let wait = bucket.remaining(500, 0, t0);
        assert_eq!(wait, Duration::from_millis(500));
        assert_eq!(bucket.remaining(0, 0, t0), Duration::ZERO);
    }
}
