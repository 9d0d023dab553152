//! Per-source peer state and the socket-wide peer table.
//!
//! The outer `PeerTable` is an RW lock guarding only the map's shape (insert/remove on
//! discovery/expiry; readers for lookup); each `Peer` owns its own `Mutex`, held across
//! intake and receive-window mutation. One mutex per peer rather than one mutex for the
//! whole table keeps unrelated peers' NAK/RDATA processing from serialising against each
//! other, while still guaranteeing all receiver-path mutation for a given peer is
//! serialised (see DESIGN.md).

use parking_lot::{Mutex, RwLock};
use pgm_core::config::{NakConfig, RxwConfig};
use pgm_core::stats::PeerStats;
use pgm_core::tsi::Tsi;
use pgm_window::{ReassemblyTable, ReceiveWindow};
use pgm_wire::Nla;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

pub struct Peer {
    pub tsi: Tsi,
    pub rxw: ReceiveWindow,
    pub reassembly: ReassemblyTable,
    pub stats: PeerStats,
    /// Last-seen network-layer address this peer advertised (its own NLA).
    pub nla: Option<Nla>,
    /// NLA the peer told us to redirect NAKs to (DLR), if any.
    pub redirect_nla: Option<Nla>,
    /// Multicast group address this peer is publishing on.
    pub group_nla: Option<Nla>,
    /// FEC parameters this source advertised, if any (`n`, `k`, proactive/on-demand use).
    pub fec: Option<PeerFec>,
    pub last_activity: Instant,
    pub spmr_pending: bool,
    /// Receive-only sockets configured `passive` observe loss without emitting NAKs.
    pub passive: bool,
    /// Transmission groups in flight, keyed by group base sequence.
    pub fec_groups: BTreeMap<u32, FecGroup>,
}

/// One transmission group's received offsets, accumulated until either `k` original
/// sequences arrived (no repair needed) or `k` total (original + parity) are in hand and
/// the missing originals can be reconstructed.
pub struct FecGroup {
    pub len: usize,
    pub originals: BTreeMap<usize, Vec<u8>>,
    pub parity: BTreeMap<usize, Vec<u8>>,
}

impl FecGroup {
    fn new() -> Self {
        Self {
            len: 0,
            originals: BTreeMap::new(),
            parity: BTreeMap::new(),
        }
    }
}

/// FEC parameters a source has advertised for its transmission groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerFec {
    pub n: u8,
    pub k: u8,
    pub use_proactive: bool,
    pub use_ondemand: bool,
}

impl Peer {
    pub fn new(tsi: Tsi, rxw_config: RxwConfig, nak_config: NakConfig, passive: bool) -> Self {
        tracing::debug!(?tsi, passive, "new peer discovered");
        Self {
            tsi,
            rxw: ReceiveWindow::new(rxw_config, nak_config),
            reassembly: ReassemblyTable::new(),
            stats: PeerStats::default(),
            nla: None,
            redirect_nla: None,
            group_nla: None,
            fec: None,
            last_activity: Instant::now(),
            spmr_pending: false,
            passive,
            fec_groups: BTreeMap::new(),
        }
    }

    /// Record one offset of a transmission group (original or parity) and, once `k` distinct
    /// offsets are available, attempt reconstruction of the missing originals.
    /// Returns the reconstructed `(offset, payload)` pairs for originals that were missing.
    pub fn on_fec_packet(
        &mut self,
        group_base: u32,
        offset: usize,
        is_parity: bool,
        payload: Vec<u8>,
        n: usize,
        k: usize,
    ) -> Vec<(usize, Vec<u8>)> {
        {
            let group = self
                .fec_groups
                .entry(group_base)
                .or_insert_with(FecGroup::new);
            group.len = payload.len();
            if is_parity {
                group.parity.insert(offset, payload);
            } else {
                group.originals.insert(offset, payload);
            }
        }

        let group = self.fec_groups.get(&group_base).expect("just inserted");
        if group.originals.len() >= k {
            self.fec_groups.remove(&group_base);
            return Vec::new();
        }
        if group.originals.len() + group.parity.len() < k {
            return Vec::new();
        }

        let have_originals: Vec<usize> = group.originals.keys().copied().collect();
        let mut offsets = have_originals.clone();
        let mut packets: Vec<&[u8]> = group.originals.values().map(|v| v.as_slice()).collect();
        for (&off, payload) in group.parity.iter().take(k - group.originals.len()) {
            offsets.push(off);
            packets.push(payload.as_slice());
        }

        let recovered = match pgm_fec::decode(n, k, &offsets, &packets) {
            Ok(originals) => Some(
                originals
                    .into_iter()
                    .enumerate()
                    .filter(|(off, _)| !have_originals.contains(off))
                    .collect::<Vec<_>>(),
            ),
            Err(err) => {
                tracing::warn!(tsi = ?self.tsi, group_base, %err, "FEC reconstruction failed");
                None
            }
        };
        self.fec_groups.remove(&group_base);
        recovered.unwrap_or_default()
    }

    /// Record fresh activity from this peer, clearing any outstanding SPMR wait — an SPM or
    /// data packet is exactly the response an SPMR was requesting.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.spmr_pending = false;
    }

    pub fn is_expired(&self, now: Instant, peer_expiry: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > peer_expiry
    }
}

#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<Tsi, Arc<Mutex<Peer>>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an existing peer, or create and insert one for `tsi`.
    pub fn get_or_create(
        &self,
        tsi: Tsi,
        rxw_config: &RxwConfig,
        nak_config: &NakConfig,
        passive: bool,
    ) -> Arc<Mutex<Peer>> {
        if let Some(peer) = self.peers.read().get(&tsi) {
            return peer.clone();
        }
        let mut peers = self.peers.write();
        peers
            .entry(tsi)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Peer::new(
                    tsi,
                    rxw_config.clone(),
                    nak_config.clone(),
                    passive,
                )))
            })
            .clone()
    }

    pub fn get(&self, tsi: &Tsi) -> Option<Arc<Mutex<Peer>>> {
        self.peers.read().get(tsi).cloned()
    }

    /// Snapshot of every currently-known peer TSI, for timer sweeps that must visit each
    /// peer without holding the table lock across per-peer mutex acquisition.
    pub fn tsis(&self) -> Vec<Tsi> {
        self.peers.read().keys().copied().collect()
    }

    pub fn remove(&self, tsi: &Tsi) -> Option<Arc<Mutex<Peer>>> {
        self.peers.write().remove(tsi)
    }

    /// Every peer whose `last_activity` predates `peer_expiry`, removed as a side effect —
    /// their pending reassemblies become implicitly LOST by being dropped with the peer.
    pub fn sweep_expired(&self, now: Instant, peer_expiry: std::time::Duration) -> Vec<Tsi> {
        let expired: Vec<Tsi> = self
            .peers
            .read()
            .iter()
            .filter(|(_, peer)| peer.lock().is_expired(now, peer_expiry))
            .map(|(tsi, _)| *tsi)
            .collect();
        if !expired.is_empty() {
            let mut peers = self.peers.write();
            for tsi in &expired {
                peers.remove(tsi);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
