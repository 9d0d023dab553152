//! Socket-buffer (SKB): the canonical packet unit.
//!
//! A single contiguous backing buffer with four cursors `head <= data <= tail <= end`.
//! `len = tail - data`. Shared via `Arc`; window and state-queue holders keep the sequence
//! number and look the SKB up through the owning window rather than aliasing a raw pointer
//! into it.

use crate::tsi::Tsi;
use std::sync::Arc;
use std::time::Instant;

/// Shared, reference-counted SKB handle. `Arc::strong_count` stands in for the reference
/// count invariant (`refcount >= 1` for any live SKB — guaranteed by `Arc` itself).
pub type SkbHandle = Arc<Skb>;

#[derive(Debug)]
pub struct Skb {
    buffer: Vec<u8>,
    head: usize,
    data: usize,
    tail: usize,
    end: usize,

    pub tsi: Tsi,
    pub sequence: u32,
    pub timestamp: Instant,
    pub zero_padded: bool,
}

impl Skb {
    /// Allocate a buffer of `capacity` bytes, reserving `headroom` bytes before the data
    /// cursor for headers to be pushed later (e.g. retransmit re-framing).
    pub fn with_capacity(tsi: Tsi, sequence: u32, capacity: usize, headroom: usize) -> Self {
        assert!(headroom <= capacity);
        Self {
            buffer: vec![0u8; capacity],
            head: 0,
            data: headroom,
            tail: headroom,
            end: capacity,
            tsi,
            sequence,
            timestamp: Instant::now(),
            zero_padded: false,
        }
    }

    /// Build an SKB directly from a fully-formed wire payload (no headroom).
    pub fn from_payload(tsi: Tsi, sequence: u32, payload: &[u8]) -> Self {
        Self {
            buffer: payload.to_vec(),
            head: 0,
            data: 0,
            tail: payload.len(),
            end: payload.len(),
            tsi,
            sequence,
            timestamp: Instant::now(),
            zero_padded: false,
        }
    }

    pub fn head(&self) -> usize {
        self.head
    }
    pub fn data_offset(&self) -> usize {
        self.data
    }
    pub fn tail_offset(&self) -> usize {
        self.tail
    }
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.tail - self.data
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `truesize = end - skb_origin`; origin is index 0 of our backing buffer.
    pub fn truesize(&self) -> usize {
        self.end
    }

    pub fn head_room(&self) -> usize {
        self.data - self.head
    }

    pub fn tail_room(&self) -> usize {
        self.end - self.tail
    }

    /// The current data region `[data, tail)`.
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.data..self.tail]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.data..self.tail]
    }

    /// Move the data cursor back by `n` bytes to make room for a header, returning the new
    /// leading region for the caller to fill. Fails if insufficient head room.
    pub fn push_header(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.head_room() {
            return None;
        }
        self.data -= n;
        Some(&mut self.buffer[self.data..self.data + n])
    }

    /// Extend the tail cursor by `n` bytes of payload, returning the new trailing region.
    pub fn put_tail(&mut self, n: usize) -> Option<&mut [u8]> {
        if n > self.tail_room() {
            return None;
        }
        let start = self.tail;
        self.tail += n;
        Some(&mut self.buffer[start..self.tail])
    }

    /// Whole backing buffer from `head` to `end`, used for checksum computation over the
    /// full framed packet.
    pub fn framed(&self) -> &[u8] {
        &self.buffer[self.head..self.tail]
    }

    /// Validate the four-cursor invariant.
    pub fn check_invariants(&self) -> bool {
        self.head <= self.data
            && self.data <= self.tail
            && self.tail <= self.end
            && self.end <= self.buffer.len()
    }
}

/// Identity for state-machine comparisons: same session, same sequence, same bytes.
/// Cursor layout and `timestamp` are deliberately excluded — two SKBs framed differently
/// around identical payload data are the same packet as far as any caller can observe.
impl PartialEq for Skb {
    fn eq(&self, other: &Self) -> bool {
        self.tsi == other.tsi && self.sequence == other.sequence && self.data() == other.data()
    }
}

impl Eq for Skb {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsi::Gsi;

    fn tsi() -> Tsi {
        Tsi::new(Gsi([0; 6]), 1000)
    }

    #[test]
    fn cursor_invariants_hold() {
        let mut skb = Skb::with_capacity(tsi(), 1, 64, 16);
        assert!(skb.check_invariants());
        skb.put_tail(10).unwrap();
        assert_eq!(skb.len(), 10);
        skb.push_header(4).unwrap();
        assert_eq!(skb.len(), 14);
        assert!(skb.check_invariants());
    }

    #[test]
    fn push_header_bounded_by_head_room() {
        let mut skb = Skb::with_capacity(tsi(), 1, 32, 4);
        assert!(skb.push_header(5).is_none());
        assert!(skb.push_header(4).is_some());
    }
}
