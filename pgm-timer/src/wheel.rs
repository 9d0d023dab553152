//! Per-socket `next_poll` computation.
//!
//! `next_poll` is the earliest of every live deadline a socket cares about: ambient/heartbeat
//! SPM, and each peer's NAK back-off/NCF/RDATA/expiry heads. Those sources live wherever their
//! owning structure lives (the source engine, each peer's `ReceiveWindow`); `TimerWheel` only
//! knows how to combine whatever the caller hands it into one deadline and report against it —
//! a small, independently testable building block rather than one monolithic timer object.

use std::time::{Duration, Instant};

/// Callback surface the timer drives once `next_poll` is reached: for the source, emits
/// ambient or heartbeat SPM as appropriate and reschedules; for each peer, walks the head of
/// each deadline-ordered queue emitting NAKs, transitioning states, and expiring peers whose
/// last-activity is older than `peer_expiry`.
pub trait Dispatchable {
    /// Emit whichever SPM (ambient or next heartbeat) is due and reschedule the SPM clock.
    fn dispatch_spm(&mut self, now: Instant);
    /// Service every peer whose back-off/NCF/RDATA/expiry deadline is due.
    fn dispatch_peers(&mut self, now: Instant);
}

/// Tracks one socket's next wakeup instant, recomputed each `prepare` from a fresh set of
/// source deadlines (the caller owns those sources; `TimerWheel` just folds them).
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerWheel {
    next_poll: Option<Instant>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self { next_poll: None }
    }

    /// Recompute `next_poll` as the minimum of every supplied source (absent sources are
    /// skipped). Returns true if the new deadline has already passed `now`.
    pub fn prepare(&mut self, now: Instant, sources: impl IntoIterator<Item = Option<Instant>>) -> bool {
        self.next_poll = sources.into_iter().flatten().min();
        self.check(now)
    }

    /// True once `now` has reached the last-computed `next_poll`.
    pub fn check(&self, now: Instant) -> bool {
        self.next_poll.is_some_and(|t| now >= t)
    }

    /// Time remaining until `next_poll`, clamped to zero if already due or unset.
    pub fn expiration(&self, now: Instant) -> Duration {
        match self.next_poll {
            Some(t) if t > now => t - now,
            _ => Duration::ZERO,
        }
    }

    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// Invoke `target`'s dispatch hooks if `next_poll` is due.
    pub fn dispatch(&mut self, now: Instant, target: &mut impl Dispatchable) {
        if self.check(now) {
            target.dispatch_spm(now);
            target.dispatch_peers(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counting {
        spm_calls: Cell<u32>,
        peer_calls: Cell<u32>,
    }

    impl Dispatchable for Counting {
        fn dispatch_spm(&mut self, _now: Instant) {
            self.spm_calls.set(self.spm_calls.get() + 1);
        }
        fn dispatch_peers(&mut self, _now: Instant) {
            self.peer_calls.set(self.peer_calls.get() + 1);
        }
    }

    #[test]
    fn prepare_takes_earliest_source() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        let expired = wheel.prepare(
            t0,
            [
                Some(t0 + Duration::from_secs(5)),
                Some(t0 + Duration::from_secs(1)),
                None,
            ]);
        assert!(!expired);
        assert_eq!(wheel.next_poll, Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn no_sources_never_expires() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        assert!(!wheel.prepare(t0, [None, None]));
        assert_eq!(wheel.expiration(t0), Duration::ZERO);
    }

    #[test]
    fn check_and_expiration_track_now() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.prepare(t0, [Some(t0 + Duration::from_millis(100))]);
        assert!(!wheel.check(t0));
        assert_eq!(wheel.expiration(t0), Duration::from_millis(100));
        let later = t0 + Duration::from_millis(150);
        assert!(wheel.check(later));
        assert_eq!(wheel.expiration(later), Duration::ZERO);
    }

    #[test]
    fn dispatch_only_fires_target_when_due() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.prepare(t0, [Some(t0 + Duration::from_secs(1))]);
        let mut target = Counting {
            spm_calls: Cell::new(0),
            peer_calls: Cell::new(0),
        };
        wheel.dispatch(t0, &mut target);
        assert_eq!(target.spm_calls.get(), 0);
        wheel.dispatch(t0 + Duration::from_secs(2), &mut target);
        assert_eq!(target.spm_calls.get(), 1);
        assert_eq!(target.peer_calls.get(), 1);
    }
}
