//! APDU reassembly from OPT_FRAGMENT-tagged sequences: a multi-fragment
//! message is held until every offset in `[0, apdu_length)` is covered by a HAVE-DATA
//! fragment, then delivered as one atomic unit in first-fragment sequence order.

use pgm_wire::OptFragment;
use std::collections::BTreeMap;

#[derive(Debug)]
struct PendingApdu {
    apdu_length: u32,
    fragments: BTreeMap<u32, Vec<u8>>, // offset -> payload
    covered: u32,
}

impl PendingApdu {
    fn new(apdu_length: u32) -> Self {
        Self {
            apdu_length,
            fragments: BTreeMap::new(),
            covered: 0,
        }
    }

    fn insert(&mut self, offset: u32, payload: Vec<u8>) {
        let len = payload.len() as u32;
        if self.fragments.insert(offset, payload).is_none() {
            self.covered += len;
        }
    }

    /// Cheap pre-filter: total bytes collected so far must reach `apdu_length` before the
    /// precise tiling check in `tiles_exactly` is worth running.
    fn is_complete(&self) -> bool {
        self.covered >= self.apdu_length
    }

    fn tiles_exactly(&self) -> bool {
        let mut next_expected = 0u32;
        for (&offset, payload) in &self.fragments {
            if offset != next_expected {
                return false;
            }
            next_expected = offset.saturating_add(payload.len() as u32);
        }
        next_expected == self.apdu_length
    }

    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.apdu_length as usize);
        for (_, payload) in self.fragments {
            out.extend_from_slice(&payload);
        }
        out
    }
}

/// Tracks in-flight multi-fragment APDUs for one peer, keyed by the first-fragment sequence
/// number (which also orders delivery ordering guarantee).
#[derive(Default)]
pub struct ReassemblyTable {
    pending: BTreeMap<u32, PendingApdu>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the assembled APDU once every offset in
    /// `[0, apdu_length)` is covered.
    pub fn on_fragment(&mut self, frag: OptFragment, payload: Vec<u8>) -> Option<Vec<u8>> {
        let entry = self
            .pending
            .entry(frag.first_sequence)
            .or_insert_with(|| PendingApdu::new(frag.apdu_length));
        entry.insert(frag.fragment_offset, payload);

        if entry.is_complete() && entry.tiles_exactly() {
            let apdu = self.pending.remove(&frag.first_sequence).unwrap();
            return Some(apdu.assemble());
        }
        None
    }

    /// Drop a pending reassembly whose first fragment's sequence was declared LOST.
    pub fn discard(&mut self, first_sequence: u32) {
        self.pending.remove(&first_sequence);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
