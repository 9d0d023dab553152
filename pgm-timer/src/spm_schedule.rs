//! SPM heartbeat cadence: a configurable sequence of intervals consumed
//! monotonically (default 100 ms × 4, 1.3 s, 7 s, 16 s, 25 s, 30 s), dropping to the ambient
//! interval once exhausted. Any ODATA emission resets the index to 0.

use pgm_core::config::SpmConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SpmSchedule {
    heartbeat_ivls: Vec<Duration>,
    ambient: Duration,
    index: usize,
    last_emit: Option<Instant>,
}

impl SpmSchedule {
    pub fn new(config: &SpmConfig) -> Self {
        Self {
            heartbeat_ivls: config.heartbeat_ivls(),
            ambient: config.ambient_interval(),
            index: 0,
            last_emit: None,
        }
    }

    fn current_interval(&self) -> Duration {
        self.heartbeat_ivls
            .get(self.index)
            .copied()
            .unwrap_or(self.ambient)
    }

    /// The instant the next SPM is due, measured from the last emission (or `now` if none has
    /// been sent yet).
    pub fn next_deadline(&self, now: Instant) -> Instant {
        self.last_emit.unwrap_or(now) + self.current_interval()
    }

    /// Record that an SPM was just sent, advancing the heartbeat index until it runs out,
    /// after which every subsequent call holds at the ambient cadence.
    pub fn on_spm_sent(&mut self, now: Instant) {
        self.last_emit = Some(now);
        if self.index < self.heartbeat_ivls.len() {
            self.index += 1;
        }
    }

    /// An ODATA was sent: restart the heartbeat schedule from its first interval.
    pub fn on_odata_sent(&mut self, now: Instant) {
        if self.index != 0 {
            tracing::debug!(previous_index = self.index, "ODATA sent, resetting SPM heartbeat schedule");
        }
        self.index = 0;
        self.last_emit = Some(now);
    }

    /// True once the configured heartbeat table has been fully consumed and the cadence has
    /// dropped to `ambient_interval`.
    pub fn is_ambient(&self) -> bool {
        self.index >= self.heartbeat_ivls.len()
    }

    /// An SPMR arrived asking for an immediate heartbeat, honoured only when this socket is a
    /// source. Answers whether the caller may send one right now — granted unless an SPM
    /// already went out within the shortest configured interval, bounding how often a flood of
    /// SPMRs can force wire output. The caller is expected to follow a grant with an actual
    /// send and a matching `on_spm_sent(now)` call.
    pub fn request_immediate(&self, now: Instant) -> bool {
        let min_gap = self.heartbeat_ivls.first().copied().unwrap_or(self.ambient);
        match self.last_emit {
            Some(t) => now.saturating_duration_since(t) >= min_gap,
            None => true,
        }
    }
}
