//! Transmit window: a retained run of source SKBs available for
//! retransmission, aged out by count, elapsed time, or a rate-product byte budget.
//!
//! A sequence-keyed retention buffer with trim-on-push behaviour; the eviction policy
//! itself (time and rate-product bounds rather than a fixed doubling window) is this
//! protocol's own.

use pgm_core::config::TxwConfig;
use pgm_core::skb::SkbHandle;
use std::collections::VecDeque;
use std::time::Instant;

struct Entry {
    sequence: u32,
    skb: SkbHandle,
    enqueued_at: Instant,
}

/// Single-producer retention window for one transport session's outbound SKBs.
///
/// Not internally synchronised — a single lock around the whole window is expected to be
/// held by the caller (the source engine) for every method call here.
pub struct TransmitWindow {
    config: TxwConfig,
    entries: VecDeque<Entry>,
    lead: Option<u32>,
    trail: u32,
}

impl TransmitWindow {
    pub fn new(config: TxwConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            lead: None,
            trail: 0,
        }
    }

    pub fn trail(&self) -> u32 {
        self.trail
    }

    pub fn lead(&self) -> Option<u32> {
        self.lead
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reserve the next sequence number, evicting the oldest retained SKB first if the
    /// window is already at capacity.
    pub fn alloc_sqn(&mut self) -> u32 {
        let next = self.lead.map_or(0, |l| l.wrapping_add(1));
        self.lead = Some(next);
        while self.entries.len() >= self.config.sqns as usize {
            self.drop_oldest();
        }
        next
    }

    /// Associate `skb` with `sequence`; must be called before any retransmit request for
    /// that sequence can be served.
    pub fn append(&mut self, sequence: u32, skb: SkbHandle) {
        self.entries.push_back(Entry {
            sequence,
            skb,
            enqueued_at: Instant::now(),
        });
        if let Some(front) = self.entries.front() {
            self.trail = front.sequence;
        }
    }

    /// Look up the SKB for `sqn`, if still retained. A `None` here means the receiver's NAK
    /// is unrecoverable from this source and should be left unanswered.
    pub fn peek(&self, sqn: u32) -> Option<SkbHandle> {
        self.entries
            .iter()
            .find(|e| e.sequence == sqn)
            .map(|e| e.skb.clone())
    }

    fn drop_oldest(&mut self) {
        if let Some(dropped) = self.entries.pop_front() {
            tracing::debug!(sequence = dropped.sequence, "txw: evicted oldest SKB");
        }
        if let Some(front) = self.entries.front() {
            self.trail = front.sequence;
        } else if let Some(lead) = self.lead {
            self.trail = lead.wrapping_add(1);
        }
    }

    /// Enforce `secs` (age) and `secs * max_rte` (byte-budget) retention, releasing SKBs
    /// that exceed either bound.
    pub fn advance_trail(&mut self, now: Instant) {
        let max_age = std::time::Duration::from_secs(self.config.secs as u64);
        let byte_budget = self.config.secs as u64 * self.config.max_rte as u64;

        while let Some(front) = self.entries.front() {
            if now.duration_since(front.enqueued_at) > max_age {
                self.drop_oldest();
                continue;
            }
            break;
        }

        let mut total: u64 = self.entries.iter().map(|e| e.skb.len() as u64).sum();
        while total > byte_budget {
            let Some(front) = self.entries.front() else { break };
            total = total.saturating_sub(front.skb.len() as u64);
            self.drop_oldest();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgm_core::tsi::{Gsi, Tsi};

    fn sample_skb(sequence: u32) -> SkbHandle {
        let tsi = Tsi::new(Gsi([0; 6]), 7500);
        SkbHandle::new(pgm_core::skb::Skb::from_payload(tsi, sequence, &[0u8; 64]))
    }

    fn small_config(sqns: u32) -> TxwConfig {
        TxwConfig {
            sqns,
            secs: 60,
            max_rte: 400_000,
        }
    }

    #[test]
    fn alloc_append_peek_round_trip() {
        let mut txw = TransmitWindow::new(small_config(8));
        let sqn = txw.alloc_sqn();
        assert_eq!(sqn, 0);
        txw.append(sqn, sample_skb(sqn));
        assert!(txw.peek(sqn).is_some());
        assert!(txw.peek(sqn + 1).is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut txw = TransmitWindow::new(small_config(4));
        for _ in 0..6 {
            let sqn = txw.alloc_sqn();
            txw.append(sqn, sample_skb(sqn));
        }
        assert_eq!(txw.len(), 4);
        assert!(txw.peek(0).is_none());
        assert!(txw.peek(1).is_none());
        assert!(txw.peek(5).is_some());
    }

    #[test]
    fn advance_trail_enforces_rate_product_budget() {
        let mut cfg = small_config(64);
        cfg.secs = 1;
        cfg.max_rte = 32; // 32 bytes/sec budget over 1 sec retention = 32 bytes total
        let mut txw = TransmitWindow::new(cfg);
        for _ in 0..4 {
            let sqn = txw.alloc_sqn();
            txw.append(sqn, sample_skb(sqn)); // 64 bytes each
        }
        txw.advance_trail(Instant::now());
        let total: u64 = (0..4)
            .filter_map(|s| txw.peek(s))
            .map(|s| s.len() as u64)
            .sum();
        assert!(total <= 32);
    }
}
