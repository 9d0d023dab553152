//! Source-side engine: fragmenting send, NAK intake/retransmit, and FEC parity
//! generation over the active transmission group.
//!
//! Every source-path invariant except the raw send buffer itself is held across
//! ODATA/RDATA shaping under a single `parking_lot::Mutex` wrapping the whole engine below
//! rather than field-by-field locks — this socket has exactly one local source identity, so
//! there is no concurrent-peer case to split further (contrast `PeerTable`, where per-peer
//! locks are worth it).

use pgm_core::config::PgmConfig;
use pgm_core::skb::{Skb, SkbHandle};
use pgm_core::stats::SourceStats;
use pgm_core::tsi::Tsi;
use pgm_core::{Error, Result};
use pgm_timer::SpmSchedule;
use pgm_window::TransmitWindow;
use pgm_wire::{Body, DataBody, Nla, OptFragment, Options, Packet, SpmBody};
use parking_lot::Mutex;
use std::time::Instant;

use crate::rate::RateBucket;

const IP_HDR_OVERHEAD: usize = 20;

struct SourceState {
    txw: TransmitWindow,
    spm: SpmSchedule,
    rate: RateBucket,
    group_base: Option<u32>,
    spm_sequence: u32,
}

pub struct SourceEngine {
    tsi: Tsi,
    config: PgmConfig,
    state: Mutex<SourceState>,
    pub stats: SourceStats,
}

impl SourceEngine {
    pub fn new(tsi: Tsi, config: PgmConfig) -> Self {
        let state = SourceState {
            txw: TransmitWindow::new(config.txw.clone()),
            spm: SpmSchedule::new(&config.spm),
            rate: RateBucket::new(config.txw.max_rte),
            group_base: None,
            spm_sequence: 0,
        };
        Self {
            tsi,
            config,
            state: Mutex::new(state),
            stats: SourceStats::default(),
        }
    }

    pub fn tsi(&self) -> Tsi {
        self.tsi
    }

    /// Fragment `buf` into ODATA packets, allocating a TXW sequence for each and assigning a
    /// shared `OPT_FRAGMENT` first-sequence when more than one fragment is needed.
    /// When FEC is configured, every packet additionally carries that first-sequence as
    /// its transmission-group base so a receiver can correlate parity without a separate wire
    /// option, and `proactive_packets` parity packets are appended after the originals.
    /// On success resets the SPM heartbeat (an ODATA emission restarts the heartbeat cadence).
    pub fn send(&self, buf: &[u8], nonblocking: bool, now: Instant) -> Result<Vec<Packet>> {
        let max_tsdu = self.config.max_tsdu() as usize;

        // Every fragment beyond the first packet of an APDU also carries OPT_FRAGMENT, so a
        // payload that doesn't fit in one TSDU must be chunked to the smaller
        // max_tsdu_fragment, not max_tsdu itself.
        let needs_fragmentation = buf.len() > max_tsdu;
        let chunk_size = if needs_fragmentation {
            if max_tsdu <= OptFragment::LEN {
                return Err(Error::invalid_argument(
                    "payload requires fragmentation but max_tpdu leaves no room for OPT_FRAGMENT",
                ));
            }
            max_tsdu - OptFragment::LEN
        } else {
            max_tsdu
        };

        // A zero-length buffer still transmits: one ODATA with an empty payload, consuming
        // exactly one sequence, rather than no packets at all.
        let chunks: Vec<&[u8]> = if buf.is_empty() {
            vec![&buf[..0]]
        } else {
            buf.chunks(chunk_size).collect()
        };
        let fragmented = chunks.len() > 1;
        let fec_enabled = self.config.fec.enabled;
        let tag_group = fragmented || fec_enabled;
        let apdu_length = buf.len() as u32;

        let mut state = self.state.lock();
        let first_sequence = state.txw.lead().map_or(0, |l| l.wrapping_add(1));
        let mut packets = Vec::with_capacity(chunks.len());
        let mut offset = 0u32;
        let mut group_skbs = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let wire_len = chunk.len() + DataBody::FIXED_LEN + crate::HEADER_AND_OPTS_OVERHEAD;
            loop {
                if state.rate.check(wire_len, IP_HDR_OVERHEAD, now) {
                    break;
                }
                let wait = state.rate.remaining(wire_len, IP_HDR_OVERHEAD, now);
                if nonblocking {
                    return Err(Error::RateLimited(wait));
                }
                std::thread::sleep(wait);
            }

            let sequence = state.txw.alloc_sqn();
            let options = if tag_group {
                Options {
                    fragment: Some(OptFragment {
                        first_sequence,
                        fragment_offset: offset,
                        apdu_length,
                    }),
                    nak_list: None,
                    parity: false,
                }
            } else {
                Options::default()
            };

            let body = DataBody {
                sequence,
                trail: state.txw.trail(),
                payload: chunk.to_vec(),
            };
            let skb = SkbHandle::new(Skb::from_payload(self.tsi, sequence, chunk));
            state.txw.append(sequence, skb.clone());
            group_skbs.push(skb);

            packets.push(Packet {
                source_port: self.tsi.source_port,
                dest_port: self.tsi.source_port,
                gsi: self.tsi.gsi.0,
                body: Body::Odata(body),
                options,
            });

            SourceStats::inc(&self.stats.data_bytes_sent, chunk.len() as u64);
            offset += chunk.len() as u32;
        }
        SourceStats::inc(&self.stats.data_msgs_sent, 1);
        state.spm.on_odata_sent(now);

        if fec_enabled && self.config.fec.proactive_packets > 0 {
            let k = group_skbs.len();
            let n = k + self.config.fec.proactive_packets as usize;
            let src: Vec<&[u8]> = group_skbs.iter().map(|s| s.data()).collect();
            for p in k..n {
                let parity = pgm_fec::encode(n, k, p, &src).inspect_err(|err| {
                    tracing::warn!(tsi = ?self.tsi, n, k, offset = p, %err, "proactive FEC encode failed");
                })?;
                let sequence = state.txw.alloc_sqn();
                let skb = SkbHandle::new(Skb::from_payload(self.tsi, sequence, &parity));
                state.txw.append(sequence, skb);
                SourceStats::inc(&self.stats.parity_bytes_sent, parity.len() as u64);
                packets.push(Packet {
                    source_port: self.tsi.source_port,
                    dest_port: self.tsi.source_port,
                    gsi: self.tsi.gsi.0,
                    body: Body::Odata(DataBody {
                        sequence,
                        trail: state.txw.trail(),
                        payload: parity,
                    }),
                    options: Options {
                        fragment: Some(OptFragment {
                            first_sequence,
                            fragment_offset: offset,
                            apdu_length,
                        }),
                        nak_list: None,
                        parity: true,
                    },
                });
            }
            state.group_base = Some(first_sequence);
        }

        Ok(packets)
    }

    /// Resolve a NAK's sequence list against the TXW: sequences still retained are scheduled
    /// for RDATA, the rest are unrecoverable (caller should emit NNAK for them).
    pub fn on_nak(&self, sequences: &[u32]) -> (Vec<SkbHandle>, Vec<u32>) {
        let state = self.state.lock();
        let mut retransmit = Vec::new();
        let mut unrecoverable = Vec::new();
        for &sqn in sequences {
            match state.txw.peek(sqn) {
                Some(skb) => retransmit.push(skb),
                None => unrecoverable.push(sqn),
            }
        }
        SourceStats::inc(&self.stats.nak_packets_received, sequences.len() as u64);
        if !unrecoverable.is_empty() {
            tracing::warn!(
                tsi = ?self.tsi,
                sequences = ?unrecoverable,
                "NAK for sequences no longer retained in transmit window"
            );
            SourceStats::inc(&self.stats.nak_errors, unrecoverable.len() as u64);
        }
        (retransmit, unrecoverable)
    }

    /// Age the TXW's retained run by elapsed time and rate-product budget.
    pub fn advance_trail(&self, now: Instant) {
        self.state.lock().txw.advance_trail(now);
    }

    pub fn spm_deadline(&self, now: Instant) -> Instant {
        self.state.lock().spm.next_deadline(now)
    }

    /// Current trailing-edge sequence of the transmit window, for stamping RDATA retransmits.
    pub fn trail(&self) -> u32 {
        self.state.lock().txw.trail()
    }

    pub fn on_spm_sent(&self, now: Instant) {
        self.state.lock().spm.on_spm_sent(now);
        SourceStats::inc(&self.stats.ambient_spm_sent, 1);
    }

    /// An SPMR arrived requesting an immediate SPM; honoured only when this socket is itself
    /// a source. Rate-limited to the shortest configured heartbeat interval.
    pub fn on_spmr(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if !state.spm.request_immediate(now) {
            return false;
        }
        state.spm.on_spm_sent(now);
        SourceStats::inc(&self.stats.heartbeat_spm_sent, 1);
        true
    }

    /// Build the next SPM body, advancing its monotonic `spm_sequence`, carrying the
    /// current trailing/leading TXW edges and this source's NLA.
    pub fn build_spm(&self, nla: Nla) -> SpmBody {
        let mut state = self.state.lock();
        let spm_sequence = state.spm_sequence;
        state.spm_sequence = state.spm_sequence.wrapping_add(1);
        SpmBody {
            spm_sequence,
            trail: state.txw.trail(),
            lead: state.txw.lead().unwrap_or(0),
            source_nla: nla,
        }
    }

    /// Wrap `build_spm` into a full wire packet addressed from this source's TSI.
    pub fn build_spm_packet(&self, nla: Nla) -> Packet {
        let body = self.build_spm(nla);
        Packet {
            source_port: self.tsi.source_port,
            dest_port: self.tsi.source_port,
            gsi: self.tsi.gsi.0,
            body: Body::Spm(body),
            options: Options::default(),
        }
    }

    /// Generate parity packets for the transmission group starting at `group_base` covering
    /// `skbs` (exactly `k` of them). A single parity packet can repair any one
    /// loss within the group.
    pub fn generate_parity(
        &self,
        group_base: u32,
        skbs: &[SkbHandle],
        parity_count: u32,
    ) -> Result<Vec<Vec<u8>>> {
        let k = skbs.len();
        let n = k + parity_count as usize;
        let src: Vec<&[u8]> = skbs.iter().map(|s| s.data()).collect();
        let mut out = Vec::with_capacity(parity_count as usize);
        for p in k..n {
            out.push(pgm_fec::encode(n, k, p, &src).inspect_err(|err| {
                tracing::warn!(tsi = ?self.tsi, group_base, n, k, offset = p, %err, "on-demand FEC encode failed");
            })?);
        }
        SourceStats::inc(
            &self.stats.parity_bytes_sent,
            out.iter().map(|p| p.len() as u64).sum(),
        );
        self.state.lock().group_base = Some(group_base);
        Ok(out)
    }
}
