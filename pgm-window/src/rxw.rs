//! Per-peer receive window and its per-sequence state machine.
//!
//! A sequence-keyed retention structure with trim-on-insert housekeeping, generalised from
//! a single "delivered or not" flag to the five-state NAK/NCF/RDATA machine this protocol
//! requires. Intrusive per-state linked lists are replaced here by a window-owned
//! expiry-ordered min-heap keyed by sequence; stale heap entries (superseded by a later
//! state transition) are discarded lazily via a per-sequence generation counter rather than
//! removed in place.
//!
//! Delivery itself is gated by a separate commit cursor: a sequence resolving to HAVE-DATA
//! or LOST does not by itself produce an action. Only when every lower sequence has also
//! resolved does the cursor step forward and release the run of actions in order, so a
//! caller never observes delivery (or loss) out of sequence order.

use pgm_core::config::{NakConfig, RxwConfig};
use pgm_core::seq::{seq_gt, seq_lt, seq_lte};
use pgm_core::skb::SkbHandle;
use pgm_wire::OptFragment;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Per-sequence state. `Empty` is never stored explicitly: a sequence only
/// gets a slot the moment the window extends past it, landing directly in `BackOff`.
/// `retries` counts completed NAK attempts, carried through each `BackOff` re-entry so
/// `WaitNcf`/`WaitData` can tell whether the *next* expiry should retry or give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqnState {
    BackOff { expiry: Instant, retries: u32 },
    WaitNcf { expiry: Instant, retries: u32 },
    WaitData { expiry: Instant, retries: u32 },
    HaveData(SkbHandle, Option<OptFragment>),
    Lost,
}

/// Action the receiver must take as a result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxwAction {
    SendNak(u32),
    Deliver(u32, SkbHandle, Option<OptFragment>),
    ReportLoss(u32),
}

pub struct ReceiveWindow {
    config: RxwConfig,
    nak: NakConfig,
    trail: u32,
    lead: Option<u32>,
    /// Next sequence awaiting an ordered-delivery decision; `None` until the window has
    /// ever seen a lead (no data and no SPM yet).
    commit: Option<u32>,
    slots: BTreeMap<u32, SqnState>,
    /// Current generation per sequence; bumped on every state mutation so heap entries
    /// minted before the bump can be recognised as stale and skipped on pop.
    generations: HashMap<u32, u64>,
    deadlines: BinaryHeap<Reverse<(Instant, u32, u64)>>,
}

impl ReceiveWindow {
    pub fn new(config: RxwConfig, nak: NakConfig) -> Self {
        Self {
            config,
            nak,
            trail: 0,
            lead: None,
            commit: None,
            slots: BTreeMap::new(),
            generations: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    pub fn trail(&self) -> u32 {
        self.trail
    }

    pub fn lead(&self) -> Option<u32> {
        self.lead
    }

    pub fn config(&self) -> &RxwConfig {
        &self.config
    }

    pub fn state(&self, sqn: u32) -> Option<&SqnState> {
        self.slots.get(&sqn)
    }

    fn back_off_expiry(&self, now: Instant) -> Instant {
        let factor = rand::thread_rng().gen_range(1.0..2.0);
        now + Duration::from_secs_f64(self.nak.bo_ivl().as_secs_f64() * factor)
    }

    /// Bump `seq`'s generation and schedule a deadline entry for it, returning the new
    /// generation so callers can stamp it onto the slot's stored state.
    fn arm(&mut self, seq: u32, expiry: Instant) -> u64 {
        let gen = self.generations.entry(seq).or_insert(0);
        *gen += 1;
        let gen = *gen;
        self.deadlines.push(Reverse((expiry, seq, gen)));
        gen
    }

    /// Bump `seq`'s generation without scheduling a new deadline, invalidating any
    /// outstanding heap entries for it (used when a sequence reaches a terminal state).
    fn disarm(&mut self, seq: u32) {
        *self.generations.entry(seq).or_insert(0) += 1;
    }

    fn is_current(&self, seq: u32, gen: u64) -> bool {
        self.generations.get(&seq).copied() == Some(gen)
    }

    /// The next instant at which some per-sequence timer in this window will fire, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((when, seq, gen))) = self.deadlines.peek() {
            if self.is_current(seq, gen) {
                return Some(when);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Step the commit cursor forward through every contiguous HAVE-DATA/LOST sequence,
    /// releasing a `Deliver`/`ReportLoss` action per step and stopping at the first
    /// sequence still in flight (or not yet known at all). This is the only place actions
    /// for data arrival or loss are produced, which is what keeps them in strict order.
    fn drain_commit(&mut self, actions: &mut Vec<RxwAction>) {
        let Some(mut cursor) = self.commit else {
            return;
        };
        loop {
            match self.slots.get(&cursor) {
                Some(SqnState::HaveData(skb, fragment)) => {
                    actions.push(RxwAction::Deliver(cursor, skb.clone(), *fragment));
                    cursor = cursor.wrapping_add(1);
                }
                Some(SqnState::Lost) => {
                    actions.push(RxwAction::ReportLoss(cursor));
                    cursor = cursor.wrapping_add(1);
                }
                _ => break,
            }
        }
        self.commit = Some(cursor);
    }

    /// Handle arrival of original/repair data at `sequence`. `fragment` is the packet's own
    /// `OPT_FRAGMENT`, carried alongside the payload so a later commit can hand it back to
    /// the reassembly layer even if this sequence is released well after it actually landed.
    ///
    /// Returns `(accepted, actions)`: `accepted` is `false` for a pre-trail or already-filled
    /// duplicate (nothing changed); `actions` is every action the commit cursor now permits,
    /// in order. An accepted arrival commonly yields no actions at all — the window-jump
    /// branch inserts BACK-OFF placeholders for the gap and leaves the cursor exactly where
    /// it was, withholding `sequence` itself until every lower one resolves.
    pub fn on_data(
        &mut self,
        sequence: u32,
        skb: SkbHandle,
        fragment: Option<OptFragment>,
        now: Instant,
    ) -> (bool, Vec<RxwAction>) {
        if seq_lt(sequence, self.trail) {
            tracing::debug!(sequence, "rxw: duplicate/pre-trail data, dropped");
            return (false, Vec::new());
        }

        match self.lead {
            None => {
                self.lead = Some(sequence);
                self.trail = sequence;
                self.commit = Some(sequence);
            }
            Some(lead) if seq_gt(sequence, lead.wrapping_add(1)) => {
                let mut s = lead.wrapping_add(1);
                while seq_lt(s, sequence) {
                    let expiry = self.back_off_expiry(now);
                    let gen = self.arm(s, expiry);
                    self.slots
                        .insert(s, SqnState::BackOff { expiry, retries: 0 });
                    debug_assert!(self.is_current(s, gen));
                    s = s.wrapping_add(1);
                }
                self.lead = Some(sequence);
            }
            Some(lead) if sequence == lead.wrapping_add(1) => {
                self.lead = Some(sequence);
            }
            _ => {
                // Fill of an existing placeholder within [trail, lead].
            }
        }

        if matches!(self.slots.get(&sequence), Some(SqnState::HaveData(_, _))) {
            tracing::debug!(sequence, "rxw: duplicate data for already-filled sequence");
            return (false, Vec::new());
        }
        self.disarm(sequence);
        self.slots.insert(sequence, SqnState::HaveData(skb, fragment));

        let mut actions = Vec::new();
        self.drain_commit(&mut actions);
        (true, actions)
    }

    /// An SPM (or an ODATA's own leading edge) advertised `lead` with no accompanying data:
    /// extend the window with BACK-OFF placeholders exactly as the window-jump branch of
    /// `on_data` would, without marking any sequence HAVE-DATA.
    pub fn observe_lead(&mut self, lead: u32, now: Instant) {
        match self.lead {
            None => {
                self.lead = Some(lead);
                self.trail = lead;
                self.commit = Some(lead);
            }
            Some(cur) if seq_gt(lead, cur) => {
                let mut s = cur.wrapping_add(1);
                while seq_lte(s, lead) {
                    if !matches!(self.slots.get(&s), Some(SqnState::HaveData(_, _))) {
                        let expiry = self.back_off_expiry(now);
                        let gen = self.arm(s, expiry);
                        self.slots
                            .insert(s, SqnState::BackOff { expiry, retries: 0 });
                        debug_assert!(self.is_current(s, gen));
                    }
                    s = s.wrapping_add(1);
                }
                self.lead = Some(lead);
            }
            _ => {}
        }
    }

    /// Age sequences below the advertised `rxw_trail` out to `Lost`, let the commit cursor
    /// release whatever that newly unblocks, then trim everything below the trail away.
    pub fn advance_trail(&mut self, rxw_trail: u32) -> Vec<RxwAction> {
        let mut actions = Vec::new();
        let stale: Vec<u32> = self
            .slots
            .iter()
            .filter(|(&seq, state)| {
                seq_lt(seq, rxw_trail) && !matches!(state, SqnState::HaveData(_, _) | SqnState::Lost)
            })
            .map(|(&seq, _)| seq)
            .collect();
        for seq in stale {
            self.disarm(seq);
            self.slots.insert(seq, SqnState::Lost);
        }
        if seq_gt(rxw_trail, self.trail) {
            self.trail = rxw_trail;
        }
        self.drain_commit(&mut actions);
        self.slots.retain(|&seq, _| !seq_lt(seq, self.trail));
        actions
    }

    /// Process every per-sequence timer due at or before `now`: back-off fires request a
    /// NAK and arm the NCF wait; NCF/RDATA waits either retry into BACK-OFF or give up to
    /// LOST (releasing whatever that unblocks through the commit cursor).
    pub fn expire(&mut self, now: Instant) -> Vec<RxwAction> {
        let mut actions = Vec::new();
        loop {
            let Some(&Reverse((when, seq, gen))) = self.deadlines.peek() else {
                break;
            };
            if when > now {
                break;
            }
            self.deadlines.pop();
            if !self.is_current(seq, gen) {
                continue; // superseded by a later transition; nothing to do
            }

            match self.slots.get(&seq).cloned() {
                Some(SqnState::BackOff { retries, .. }) => {
                    let expiry = now + self.nak.rpt_ivl();
                    self.arm(seq, expiry);
                    self.slots
                        .insert(seq, SqnState::WaitNcf { expiry, retries });
                    actions.push(RxwAction::SendNak(seq));
                }
                Some(SqnState::WaitNcf { retries, .. }) => {
                    self.retry_or_lose(seq, retries, self.nak.ncf_retries, now);
                }
                Some(SqnState::WaitData { retries, .. }) => {
                    self.retry_or_lose(seq, retries, self.nak.data_retries, now);
                }
                _ => {}
            }
        }
        self.drain_commit(&mut actions);
        actions
    }

    fn retry_or_lose(&mut self, seq: u32, retries: u32, limit: u32, now: Instant) {
        if retries < limit {
            let expiry = self.back_off_expiry(now);
            self.arm(seq, expiry);
            self.slots.insert(
                seq,
                SqnState::BackOff {
                    expiry,
                    retries: retries + 1,
                },
            );
        } else {
            self.disarm(seq);
            self.slots.insert(seq, SqnState::Lost);
        }
    }

    /// An NCF arrived confirming a prior NAK; move the sequence from WAIT-NCF to WAIT-DATA.
    pub fn on_ncf(&mut self, sequence: u32, now: Instant) {
        if let Some(SqnState::WaitNcf { retries, .. }) = self.slots.get(&sequence) {
            let retries = *retries;
            let expiry = now + self.nak.rdata_ivl();
            self.arm(sequence, expiry);
            self.slots
                .insert(sequence, SqnState::WaitData { expiry, retries });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgm_core::tsi::{Gsi, Tsi};

    fn window() -> ReceiveWindow {
        ReceiveWindow::new(RxwConfig::default(), NakConfig::default())
    }

    fn skb(sequence: u32) -> SkbHandle {
        let tsi = Tsi::new(Gsi([0; 6]), 7500);
        SkbHandle::new(pgm_core::skb::Skb::from_payload(tsi, sequence, &[1, 2, 3]))
    }

    #[test]
    fn first_packet_establishes_lead_and_delivers() {
        let mut rxw = window();
        let (accepted, actions) = rxw.on_data(10, skb(10), None, Instant::now());
        assert!(accepted);
        assert_eq!(actions, vec![RxwAction::Deliver(10, skb(10), None)]);
        assert_eq!(rxw.lead, Some(10));
    }

    #[test]
    fn window_jump_backfills_placeholders_in_back_off_and_withholds_delivery() {
        let mut rxw = window();
        rxw.on_data(10, skb(10), None, Instant::now());
        let (accepted, actions) = rxw.on_data(13, skb(13), None, Instant::now());
        assert!(accepted);
        assert!(matches!(rxw.state(11), Some(SqnState::BackOff { .. })));
        assert!(matches!(rxw.state(12), Some(SqnState::BackOff { .. })));
        assert!(matches!(rxw.state(13), Some(SqnState::HaveData(_, _))));
        assert_eq!(rxw.lead, Some(13));
        // 13 is held back: 11 and 12 haven't resolved yet.
        assert!(actions.is_empty());
    }

    #[test]
    fn filling_a_placeholder_marks_have_data_but_still_withholds_later_sequences() {
        let mut rxw = window();
        let now = Instant::now();
        rxw.on_data(10, skb(10), None, now);
        rxw.on_data(13, skb(13), None, now);
        let (accepted, actions) = rxw.on_data(11, skb(11), None, now);
        assert!(accepted);
        assert!(matches!(rxw.state(11), Some(SqnState::HaveData(_, _))));
        // 11 can commit now, but 12 is still BACK-OFF so 13 stays withheld.
        assert_eq!(actions, vec![RxwAction::Deliver(11, skb(11), None)]);
    }

    #[test]
    fn duplicate_data_for_already_filled_sequence_is_rejected() {
        let mut rxw = window();
        let now = Instant::now();
        rxw.on_data(10, skb(10), None, now);
        let (accepted, actions) = rxw.on_data(10, skb(10), None, now);
        assert!(!accepted);
        assert!(actions.is_empty());
    }

    #[test]
    fn out_of_order_arrivals_deliver_in_sequence_order_once_gap_fills() {
        let mut rxw = window();
        let now = Instant::now();
        assert_eq!(
            rxw.on_data(10, skb(10), None, now),
            (true, vec![RxwAction::Deliver(10, skb(10), None)])
        );
        assert!(rxw.on_data(13, skb(13), None, now).1.is_empty());
        assert_eq!(rxw.on_data(11, skb(11), None, now).1.len(), 1);
        // Filling the very last gap (12) releases both 12 and the previously-withheld 13,
        // strictly in sequence order.
        let (accepted, actions) = rxw.on_data(12, skb(12), None, now);
        assert!(accepted);
        assert_eq!(
            actions,
            vec![
                RxwAction::Deliver(12, skb(12), None),
                RxwAction::Deliver(13, skb(13), None),
            ]
        );
    }

    #[test]
    fn back_off_expiry_requests_nak_and_enters_wait_ncf() {
        let mut rxw = window();
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.on_data(12, skb(12), None, t0);
        let later = t0 + Duration::from_secs(10);
        let actions = rxw.expire(later);
        assert_eq!(actions, vec![RxwAction::SendNak(11)]);
        assert!(matches!(rxw.state(11), Some(SqnState::WaitNcf { .. })));
    }

    #[test]
    fn ncf_moves_wait_ncf_to_wait_data() {
        let mut rxw = window();
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.on_data(12, skb(12), None, t0);
        rxw.expire(t0 + Duration::from_secs(10));
        rxw.on_ncf(11, t0 + Duration::from_secs(11));
        assert!(matches!(rxw.state(11), Some(SqnState::WaitData { .. })));
    }

    #[test]
    fn exhausted_retries_end_in_lost_and_release_in_order() {
        let mut cfg = NakConfig::default();
        cfg.ncf_retries = 1;
        let mut rxw = ReceiveWindow::new(RxwConfig::default(), cfg);
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.on_data(12, skb(12), None, t0);

        let mut t = t0;
        let mut actions = Vec::new();
        for _ in 0..8 {
            t += Duration::from_secs(5);
            actions = rxw.expire(t);
            if matches!(rxw.state(11), Some(SqnState::Lost)) {
                break;
            }
        }
        assert!(matches!(rxw.state(11), Some(SqnState::Lost)));
        // The loss must release in order, ahead of the already-buffered sequence 12.
        assert_eq!(
            actions,
            vec![
                RxwAction::ReportLoss(11),
                RxwAction::Deliver(12, skb(12), None),
            ]
        );
    }

    #[test]
    fn advance_trail_ages_waiting_sequences_to_lost_and_trims() {
        let mut rxw = window();
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.on_data(13, skb(13), None, t0);
        let actions = rxw.advance_trail(12);
        assert_eq!(
            actions,
            vec![
                RxwAction::ReportLoss(11),
                RxwAction::ReportLoss(12),
                RxwAction::Deliver(13, skb(13), None),
            ]
        );
        assert_eq!(rxw.trail, 12);
        assert!(rxw.state(10).is_none());
    }

    #[test]
    fn observe_lead_backfills_without_marking_have_data() {
        let mut rxw = window();
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.observe_lead(13, t0);
        assert_eq!(rxw.lead, Some(13));
        assert!(matches!(rxw.state(11), Some(SqnState::BackOff { .. })));
        assert!(matches!(rxw.state(12), Some(SqnState::BackOff { .. })));
        assert!(matches!(rxw.state(13), Some(SqnState::BackOff { .. })));
        assert!(rxw.state(10).is_some());
    }

    #[test]
    fn next_deadline_tracks_earliest_live_timer() {
        let mut rxw = window();
        let t0 = Instant::now();
        rxw.on_data(10, skb(10), None, t0);
        rxw.on_data(12, skb(12), None, t0);
        let deadline = rxw.next_deadline().expect("a back-off deadline is armed");
        assert!(deadline > t0);
        rxw.expire(deadline + Duration::from_millis(1));
        // Sequence 11 is now WAIT-NCF with its own (later) deadline armed.
        assert!(rxw.next_deadline().is_some());
    }
}
