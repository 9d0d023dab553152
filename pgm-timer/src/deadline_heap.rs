//! Reusable expiry-ordered min-heap keyed by an arbitrary id, replacing intrusive per-state
//! linked lists with a `BinaryHeap<(Reverse<Instant>, id, ..)>` deadline queue; stale entries
//! are discarded lazily on pop via a generation counter rather than unlinked in place. Used
//! here for per-peer lifecycle deadlines (`peer_expiry`, `spmr_expiry`) rather than
//! duplicating the per-sequence heap already built into `pgm_window::ReceiveWindow`.
//!
//! Entries are never removed from the backing `BinaryHeap` in place — re-arming or cancelling
//! an id just bumps its generation, so a later `pop_expired` silently discards any heap entry
//! that generation has superseded.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Instant;

pub struct DeadlineHeap<K> {
    generations: HashMap<K, u64>,
    heap: BinaryHeap<Reverse<(Instant, K, u64)>>,
}

impl<K: Eq + Hash + Clone> Default for DeadlineHeap<K> {
    fn default() -> Self {
        Self {
            generations: HashMap::new(),
            heap: BinaryHeap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> DeadlineHeap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_current(&self, id: &K, gen: u64) -> bool {
        self.generations.get(id).copied() == Some(gen)
    }

    /// (Re-)arm `id`'s deadline to `at`, invalidating whatever deadline it previously held.
    pub fn arm(&mut self, id: K, at: Instant) {
        let gen = self.generations.entry(id.clone()).or_insert(0);
        *gen += 1;
        let gen = *gen;
        self.heap.push(Reverse((at, id, gen)));
    }

    /// Cancel `id`'s deadline, if any, without scheduling a replacement.
    pub fn cancel(&mut self, id: &K) {
        if let Some(gen) = self.generations.get_mut(id) {
            *gen += 1;
        }
    }

    /// The earliest still-live deadline in the heap, if any.
    pub fn peek_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((when, id, gen))) = self.heap.peek() {
            if self.is_current(id, *gen) {
                return Some(*when);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop every id whose deadline is due at or before `now`, discarding stale entries along
    /// the way.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(&Reverse((when, ref id, gen))) = self.heap.peek() {
            if when > now {
                break;
            }
            let id = id.clone();
            self.heap.pop();
            if self.is_current(&id, gen) {
                due.push(id);
            }
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }
}
