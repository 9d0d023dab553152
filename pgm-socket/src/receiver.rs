//! Receiver-side engine: ODATA/RDATA/SPM/NCF intake, NAK generation with
//! 63-sequence coalescing, SPMR emission, and peer lifecycle.
//!
//! Per-peer state lives under a table-wide lock; results are communicated back as typed
//! events rather than dispatched internally — `ReceiverEngine` never touches a socket
//! directly, it returns a batch of `ReceiverEvent`s and leaves wire I/O to `PgmSocket`.

use pgm_core::config::PgmConfig;
use pgm_core::skb::{Skb, SkbHandle};
use pgm_core::stats::PeerStats;
use pgm_core::tsi::Tsi;
use pgm_wire::{Body, NakBody, Nla, OptNakList, Options, Packet};
use pgm_window::RxwAction;
use std::time::Instant;

use crate::peer::{Peer, PeerTable};

/// One outcome of intake or timer dispatch that the socket facade must act on.
#[derive(Debug)]
pub enum ReceiverEvent {
    /// A complete APDU (single packet or reassembled fragments) ready for delivery.
    Delivered { tsi: Tsi, apdu: Vec<u8> },
    /// A NAK packet the socket must unicast to the source's NLA.
    Nak { tsi: Tsi, packet: Packet },
    /// An SPMR packet the socket must send to the source's NLA.
    Spmr { tsi: Tsi, packet: Packet },
    /// A sequence aged past the source's advertised trail with no repair possible.
    Loss { tsi: Tsi, sequence: u32 },
    /// A peer was removed after `peer_expiry` with no activity.
    PeerExpired { tsi: Tsi },
}

pub struct ReceiverEngine {
    config: PgmConfig,
    local_tsi: Tsi,
    local_nla: Nla,
    peers: PeerTable,
}

impl ReceiverEngine {
    pub fn new(config: PgmConfig, local_tsi: Tsi, local_nla: Nla) -> Self {
        Self {
            config,
            local_tsi,
            local_nla,
            peers: PeerTable::new(),
        }
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Earliest of every live per-peer deadline (back-off/NCF/RDATA, SPMR wait, expiry),
    /// for folding into the socket's `TimerWheel`.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        let mut fold = |candidate: Instant| {
            earliest = Some(earliest.map_or(candidate, |e: Instant| e.min(candidate)));
        };
        for tsi in self.peers.tsis() {
            let Some(peer_arc) = self.peers.get(&tsi) else {
                continue;
            };
            let mut peer = peer_arc.lock();
            if let Some(d) = peer.rxw.next_deadline() {
                fold(d);
            }
            if !peer.spmr_pending {
                fold(peer.last_activity + self.config.spmr_expiry());
            }
            fold(peer.last_activity + self.config.peer_expiry());
        }
        earliest
    }

    /// Dispatch a fully checksum-verified, decoded packet arriving from `from_tsi`. NAK/N-NAK
    /// are a source's concern, not the receiver's, and are ignored here.
    pub fn on_packet(&self, from_tsi: Tsi, packet: &Packet, now: Instant) -> Vec<ReceiverEvent> {
        match &packet.body {
            Body::Odata(body) | Body::Rdata(body) => {
                self.on_data(from_tsi, body, &packet.options, now)
            }
            Body::Spm(body) => self.on_spm(from_tsi, body, now),
            Body::Ncf(body) => self.on_ncf(from_tsi, body, &packet.options, now),
            Body::Nak(_) | Body::Nnak(_) | Body::Spmr => Vec::new(),
        }
    }

    fn on_data(
        &self,
        from_tsi: Tsi,
        body: &pgm_wire::DataBody,
        options: &Options,
        now: Instant,
    ) -> Vec<ReceiverEvent> {
        let peer_arc =
            self.peers
                .get_or_create(from_tsi, &self.config.rxw, &self.config.nak, self.config.passive);
        let mut peer = peer_arc.lock();
        peer.touch(now);

        let mut events = Vec::new();

        if self.config.fec.enabled && options.parity {
            // Parity carries no deliverable TSDU; it only ever feeds group reconstruction.
            let group_base = options.fragment.map(|f| f.first_sequence).unwrap_or(body.sequence);
            let member = body.sequence.wrapping_sub(group_base) as usize;
            let recovered = peer.on_fec_packet(
                group_base,
                member,
                true,
                body.payload.clone(),
                self.config.fec.n as usize,
                self.config.fec.k as usize,
            );
            let apdu_length = options.fragment.map(|f| f.apdu_length).unwrap_or(0);
            // A group spanning more than one member was fragmented on send, which chunks by
            // max_tsdu_fragment (max_tsdu less room for each fragment's own OPT_FRAGMENT), not
            // by max_tsdu itself; a lone-member group never has a nonzero offset to get wrong.
            let max_tsdu_fragment =
                (self.config.max_tsdu() as u32).saturating_sub(pgm_wire::OptFragment::LEN as u32);
            for (member_offset, payload) in recovered {
                let sequence = group_base.wrapping_add(member_offset as u32);
                let reconstructed_options = Options {
                    fragment: Some(pgm_wire::OptFragment {
                        first_sequence: group_base,
                        fragment_offset: member_offset as u32 * max_tsdu_fragment,
                        apdu_length,
                    }),
                    nak_list: None,
                    parity: false,
                };
                PeerStats::inc(&peer.stats.fec_packets_reconstructed, 1);
                self.deliver_data(
                    &mut peer,
                    from_tsi,
                    sequence,
                    &payload,
                    &reconstructed_options,
                    now,
                    &mut events,
                );
            }
            for action in peer.rxw.advance_trail(body.trail) {
                self.apply_rxw_action(&mut peer, from_tsi, action, &mut events);
            }
            return events;
        }

        if self.config.fec.enabled {
            // Track this original's membership too, so a later parity arrival that completes
            // the group doesn't attempt to "reconstruct" data we already have.
            let group_base = options.fragment.map(|f| f.first_sequence).unwrap_or(body.sequence);
            let member = body.sequence.wrapping_sub(group_base) as usize;
            peer.on_fec_packet(
                group_base,
                member,
                false,
                body.payload.clone(),
                self.config.fec.n as usize,
                self.config.fec.k as usize,
            );
        }

        let skb = SkbHandle::new(Skb::from_payload(from_tsi, body.sequence, &body.payload));
        let (accepted, actions) = peer.rxw.on_data(body.sequence, skb, options.fragment, now);
        if accepted {
            for action in actions {
                self.apply_rxw_action(&mut peer, from_tsi, action, &mut events);
            }
        } else {
            PeerStats::inc(&peer.stats.dup_packets, 1);
        }

        for action in peer.rxw.advance_trail(body.trail) {
            self.apply_rxw_action(&mut peer, from_tsi, action, &mut events);
        }
        events
    }

    /// Feed one FEC-reconstructed original back through the window exactly as a directly
    /// received packet would be, so reassembly and delivery stay in one place.
    fn deliver_data(
        &self,
        peer: &mut Peer,
        from_tsi: Tsi,
        sequence: u32,
        payload: &[u8],
        options: &Options,
        now: Instant,
        events: &mut Vec<ReceiverEvent>,
    ) {
        let skb = SkbHandle::new(Skb::from_payload(from_tsi, sequence, payload));
        let (_, actions) = peer.rxw.on_data(sequence, skb, options.fragment, now);
        for action in actions {
            self.apply_rxw_action(peer, from_tsi, action, events);
        }
    }

    /// Turn one commit-cursor-ordered `RxwAction` into its receiver-facing event, if any.
    /// `SendNak` is only ever produced by `expire` and is handled by its caller directly.
    fn apply_rxw_action(
        &self,
        peer: &mut Peer,
        from_tsi: Tsi,
        action: RxwAction,
        events: &mut Vec<ReceiverEvent>,
    ) {
        match action {
            RxwAction::Deliver(_, skb, fragment) => {
                PeerStats::inc(&peer.stats.data_bytes_received, skb.len() as u64);
                if let Some(frag) = fragment {
                    if let Some(apdu) = peer.reassembly.on_fragment(frag, skb.data().to_vec()) {
                        PeerStats::inc(&peer.stats.data_msgs_received, 1);
                        events.push(ReceiverEvent::Delivered {
                            tsi: from_tsi,
                            apdu,
                        });
                    }
                } else {
                    PeerStats::inc(&peer.stats.data_msgs_received, 1);
                    events.push(ReceiverEvent::Delivered {
                        tsi: from_tsi,
                        apdu: skb.data().to_vec(),
                    });
                }
            }
            RxwAction::ReportLoss(seq) => {
                tracing::warn!(tsi = ?from_tsi, sequence = seq, "sequence unrecoverable, reporting loss");
                PeerStats::inc(&peer.stats.lost_packets, 1);
                peer.reassembly.discard(seq);
                events.push(ReceiverEvent::Loss {
                    tsi: from_tsi,
                    sequence: seq,
                });
            }
            RxwAction::SendNak(_) => {}
        }
    }

    fn on_spm(
        &self,
        from_tsi: Tsi,
        body: &pgm_wire::SpmBody,
        now: Instant,
    ) -> Vec<ReceiverEvent> {
        let peer_arc =
            self.peers
                .get_or_create(from_tsi, &self.config.rxw, &self.config.nak, self.config.passive);
        let mut peer = peer_arc.lock();
        peer.touch(now);
        peer.nla = Some(body.source_nla);
        peer.rxw.observe_lead(body.lead, now);

        let mut events = Vec::new();
        for action in peer.rxw.advance_trail(body.trail) {
            self.apply_rxw_action(&mut peer, from_tsi, action, &mut events);
        }
        events
    }

    fn on_ncf(
        &self,
        from_tsi: Tsi,
        body: &NakBody,
        options: &Options,
        now: Instant,
    ) -> Vec<ReceiverEvent> {
        let Some(peer_arc) = self.peers.get(&from_tsi) else {
            return Vec::new();
        };
        let mut peer = peer_arc.lock();
        peer.touch(now);
        peer.rxw.on_ncf(body.requested_sequence, now);
        if let Some(list) = &options.nak_list {
            for &seq in &list.sequences {
                peer.rxw.on_ncf(seq, now);
            }
        }
        PeerStats::inc(&peer.stats.ncf_packets_received, 1);
        Vec::new()
    }

    /// Drive every peer's per-sequence timers (NAK back-off/NCF/RDATA), emit any
    /// due SPMR requests, and sweep peers past `peer_expiry`.
    pub fn dispatch_peers(&self, now: Instant) -> Vec<ReceiverEvent> {
        let mut events = Vec::new();
        for tsi in self.peers.tsis() {
            let Some(peer_arc) = self.peers.get(&tsi) else {
                continue;
            };
            let mut peer = peer_arc.lock();

            let actions = peer.rxw.expire(now);
            let mut nak_sqns = Vec::new();
            for action in actions {
                match action {
                    RxwAction::SendNak(seq) => nak_sqns.push(seq),
                    other => self.apply_rxw_action(&mut peer, tsi, other, &mut events),
                }
            }
            if !nak_sqns.is_empty() {
                PeerStats::inc(&peer.stats.selective_naks_sent, nak_sqns.len() as u64);
                if !peer.passive {
                    tracing::debug!(?tsi, sequences = nak_sqns.len(), "NAK back-off expired, requesting repair");
                    let group_nla = peer.group_nla.or(peer.nla).unwrap_or(self.local_nla);
                    for packet in
                        self.build_nak_packets(tsi, self.local_nla, group_nla, nak_sqns)
                    {
                        events.push(ReceiverEvent::Nak { tsi, packet });
                    }
                } else {
                    tracing::debug!(?tsi, sequences = nak_sqns.len(), "passive peer suppressing NAK");
                }
            }

            if !peer.spmr_pending
                && now.saturating_duration_since(peer.last_activity) >= self.config.spmr_expiry()
            {
                peer.spmr_pending = true;
                tracing::debug!(?tsi, "requesting SPMR after spmr_expiry with no source activity");
                events.push(ReceiverEvent::Spmr {
                    tsi,
                    packet: self.build_spmr(tsi),
                });
            }
        }

        for tsi in self.peers.sweep_expired(now, self.config.peer_expiry()) {
            tracing::info!(?tsi, "peer expired, flushing receive window");
            events.push(ReceiverEvent::PeerExpired { tsi });
        }
        events
    }

    /// Coalesce `sequences` into as few NAK packets as the 63-sequences-per-packet bound
    /// allows (one requested-sequence plus up to `MAX_NAK_LIST_EXTRA` in an OPT_NAK_LIST).
    /// Only contiguous runs share a NAK-list; a gap in the loss set starts a new packet.
    fn build_nak_packets(
        &self,
        from_tsi: Tsi,
        my_nla: Nla,
        group_nla: Nla,
        mut sequences: Vec<u32>,
    ) -> Vec<Packet> {
        sequences.sort_unstable();
        let mut runs: Vec<Vec<u32>> = Vec::new();
        for seq in sequences {
            match runs.last_mut() {
                Some(run) if run.last().map(|&last| last.wrapping_add(1)) == Some(seq) => {
                    run.push(seq);
                }
                _ => runs.push(vec![seq]),
            }
        }
        runs.into_iter()
            .flat_map(|run| {
                run.chunks(1 + pgm_wire::MAX_NAK_LIST_EXTRA)
                    .map(|chunk| {
                        let (&first, rest) = chunk.split_first().expect("non-empty chunk");
                        let nak_list = if rest.is_empty() {
                            None
                        } else {
                            Some(OptNakList {
                                sequences: rest.to_vec(),
                            })
                        };
                        Packet {
                            source_port: self.local_tsi.source_port,
                            dest_port: from_tsi.source_port,
                            gsi: from_tsi.gsi.0,
                            body: Body::Nak(NakBody {
                                requested_sequence: first,
                                source_nla: my_nla,
                                group_nla,
                            }),
                            options: Options {
                                fragment: None,
                                nak_list,
                                parity: false,
                            },
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn build_spmr(&self, to_tsi: Tsi) -> Packet {
        Packet {
            source_port: self.local_tsi.source_port,
            dest_port: to_tsi.source_port,
            gsi: to_tsi.gsi.0,
            body: Body::Spmr,
            options: Options::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgm_core::tsi::Gsi;
    use pgm_wire::{DataBody, SpmBody};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn local_tsi() -> Tsi {
        Tsi::new(Gsi([0; 6]), 7500)
    }

    fn source_tsi() -> Tsi {
        Tsi::new(Gsi([9, 9, 9, 9, 9, 9]), 7500)
    }

    fn engine() -> ReceiverEngine {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
        ReceiverEngine::new(
            PgmConfig::default(),
            local_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
        )
    }

    fn odata(sequence: u32, trail: u32, payload: &[u8]) -> Packet {
        Packet {
            source_port: source_tsi().source_port,
            dest_port: local_tsi().source_port,
            gsi: source_tsi().gsi.0,
            body: Body::Odata(DataBody {
                sequence,
                trail,
                payload: payload.to_vec(),
            }),
            options: Options::default(),
        }
    }

    #[test]
    fn single_packet_delivers_immediately() {
        let eng = engine();
        let events = eng.on_packet(source_tsi(), &odata(0, 0, b"hello"), Instant::now());
        assert!(matches!(
            &events[0],
            ReceiverEvent::Delivered { apdu, .. } if apdu == b"hello"
        ));
    }

    #[test]
    fn gap_then_back_off_expiry_yields_nak_packet() {
        let eng = engine();
        let t0 = Instant::now();
        eng.on_packet(source_tsi(), &odata(1, 0, b"one"), t0);
        eng.on_packet(source_tsi(), &odata(3, 0, b"three"), t0);

        let events = eng.dispatch_peers(t0 + Duration::from_secs(5));
        let nak = events
            .iter()
            .find_map(|e| match e {
                ReceiverEvent::Nak { packet, .. } => Some(packet),
                _ => None,
            })
            .expect("a NAK for sequence 2 should have been emitted");
        match &nak.body {
            Body::Nak(b) => assert_eq!(b.requested_sequence, 2),
            other => panic!("expected NAK body, got {other:?}"),
        }
    }

    #[test]
    fn non_contiguous_losses_split_into_separate_nak_packets() {
        let eng = engine();
        let packets = eng.build_nak_packets(
            source_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
            vec![5, 6, 7, 20, 21],
        );
        assert_eq!(packets.len(), 2);
        let requested: Vec<u32> = packets
            .iter()
            .map(|p| match &p.body {
                Body::Nak(b) => b.requested_sequence,
                other => panic!("expected NAK body, got {other:?}"),
            })
            .collect();
        assert_eq!(requested, vec![5, 20]);
        match &packets[0].options.nak_list {
            Some(list) => assert_eq!(list.sequences, vec![6, 7]),
            None => panic!("expected a NAK-list for the contiguous 5..7 run"),
        }
        match &packets[1].options.nak_list {
            Some(list) => assert_eq!(list.sequences, vec![21]),
            None => panic!("expected a NAK-list for the contiguous 20..21 run"),
        }
    }

    #[test]
    fn passive_peer_never_emits_nak() {
        let mut config = PgmConfig::default();
        config.passive = true;
        config.recv_only = true;
        let eng = ReceiverEngine::new(
            config,
            local_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
        );
        let t0 = Instant::now();
        eng.on_packet(source_tsi(), &odata(1, 0, b"one"), t0);
        eng.on_packet(source_tsi(), &odata(3, 0, b"three"), t0);
        let events = eng.dispatch_peers(t0 + Duration::from_secs(5));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ReceiverEvent::Nak { .. })));
    }

    #[test]
    fn spm_advances_trail_and_reports_loss() {
        let eng = engine();
        let t0 = Instant::now();
        eng.on_packet(source_tsi(), &odata(10, 0, b"ten"), t0);
        eng.on_packet(source_tsi(), &odata(13, 0, b"thirteen"), t0);

        let spm = Packet {
            source_port: source_tsi().source_port,
            dest_port: local_tsi().source_port,
            gsi: source_tsi().gsi.0,
            body: Body::Spm(SpmBody {
                spm_sequence: 1,
                trail: 12,
                lead: 13,
                source_nla: Nla::V4(Ipv4Addr::new(192, 0, 2, 9)),
            }),
            options: Options::default(),
        };
        let events = eng.on_packet(source_tsi(), &spm, t0);
        let losses: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ReceiverEvent::Loss { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert!(losses.contains(&11));
        assert!(losses.contains(&12));
    }

    #[test]
    fn spmr_is_emitted_after_spmr_expiry_and_only_once() {
        let mut config = PgmConfig::default();
        config.spmr_expiry_ms = 10;
        let eng = ReceiverEngine::new(
            config,
            local_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
        );
        let t0 = Instant::now();
        eng.on_packet(source_tsi(), &odata(0, 0, b"x"), t0);

        let later = t0 + Duration::from_millis(50);
        let events = eng.dispatch_peers(later);
        assert!(events
            .iter()
            .any(|e| matches!(e, ReceiverEvent::Spmr { .. })));

        // Already pending: a second dispatch before any fresh activity must not re-emit.
        let events2 = eng.dispatch_peers(later + Duration::from_millis(1));
        assert!(!events2
            .iter()
            .any(|e| matches!(e, ReceiverEvent::Spmr { .. })));
    }

    #[test]
    fn missing_original_is_reconstructed_from_parity() {
        let mut config = PgmConfig::default();
        config.fec.enabled = true;
        config.fec.n = 5;
        config.fec.k = 4;
        // max_tsdu_fragment == max_tpdu - MIN_TPDU_OVERHEAD - OPT_FRAGMENT_LEN; forced to 3 so
        // each fragment's byte offset (index * max_tsdu_fragment) lines up with this test's
        // 3-byte chunks.
        config.max_tpdu = pgm_core::config::PgmConfig::MIN_TPDU_OVERHEAD
            + 3
            + pgm_wire::OptFragment::LEN as u16;
        let eng = ReceiverEngine::new(
            config,
            local_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
        );

        let originals: Vec<Vec<u8>> = vec![
            vec![1, 2, 3],
            vec![4, 5, 6],
            vec![7, 8, 9],
            vec![10, 11, 12],
        ];
        let src_refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = pgm_fec::encode(5, 4, 4, &src_refs).unwrap();

        let group_base = 100u32;
        let tagged = |sequence: u32, byte_offset: u32, payload: &[u8], parity: bool| Packet {
            source_port: source_tsi().source_port,
            dest_port: local_tsi().source_port,
            gsi: source_tsi().gsi.0,
            body: Body::Odata(DataBody {
                sequence,
                trail: 0,
                payload: payload.to_vec(),
            }),
            options: Options {
                fragment: Some(pgm_wire::OptFragment {
                    first_sequence: group_base,
                    fragment_offset: byte_offset,
                    apdu_length: 12,
                }),
                nak_list: None,
                parity,
            },
        };

        let t0 = Instant::now();
        // Sequence 103 (the 4th original) is "lost": never delivered.
        for (i, original) in originals.iter().enumerate().take(3) {
            let sequence = group_base + i as u32;
            eng.on_packet(source_tsi(), &tagged(sequence, i as u32 * 3, original, false), t0);
        }
        let events = eng.on_packet(
            source_tsi(),
            &tagged(group_base + 4, 0, &parity, true),
            t0,
        );

        let expected_apdu: Vec<u8> = originals.iter().flatten().copied().collect();
        let delivered_full_apdu = events.iter().any(|e| {
            matches!(e, ReceiverEvent::Delivered { apdu, .. } if *apdu == expected_apdu)
        });
        assert!(
            delivered_full_apdu,
            "expected the reconstructed fragment to complete and deliver the full APDU"
        );
    }

    #[test]
    fn peer_expiry_removes_peer_and_reports_event() {
        let mut config = PgmConfig::default();
        config.peer_expiry_ms = 10;
        let eng = ReceiverEngine::new(
            config,
            local_tsi(),
            Nla::V4(Ipv4Addr::new(10, 0, 0, 2)),
        );
        let t0 = Instant::now();
        eng.on_packet(source_tsi(), &odata(0, 0, b"x"), t0);
        let events = eng.dispatch_peers(t0 + Duration::from_millis(50));
        assert!(events
            .iter()
            .any(|e| matches!(e, ReceiverEvent::PeerExpired { tsi } if *tsi == source_tsi())));
        assert!(eng.peers.get(&source_tsi()).is_none());
    }
}
