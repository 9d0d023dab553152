//! The one-process-owned `PgmSocket`: binds the multicast group, owns the
//! wire I/O, and turns `SourceEngine`/`ReceiverEngine` events into the blocking/non-blocking
//! `send`/`recv` contract with its eight-way `RecvStatus`.
//!
//! Socket setup joins then converts: a `socket2::Socket` is configured with the options
//! the OS needs (reuse-address, buffer sizes, TTL/hop-limit, multicast join) then converted
//! into a plain `std::net::UdpSocket` for the actual datagram I/O, rather than kept as a
//! `socket2` handle throughout.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};

use pgm_core::config::PgmConfig;
use pgm_core::tsi::{Gsi, Tsi};
use pgm_core::{Error, Result};
use pgm_timer::TimerWheel;
use pgm_wire::{Body, DataBody, NakBody, Nla, OptNakList, Options, Packet, MAX_NAK_LIST_EXTRA};

use crate::receiver::{ReceiverEngine, ReceiverEvent};
use crate::source::SourceEngine;
use crate::status::RecvStatus;

/// The two extra readiness surfaces beyond the raw receive socket itself.
/// Exposed so a caller's own select/poll/epoll loop can watch all three; actually registering
/// them with the OS multiplexer is the caller's job (`if_*`/OS-portability glue is out of
/// scope).
#[derive(Debug, Clone, Copy)]
pub struct SocketDescriptors {
    #[cfg(unix)]
    pub recv_fd: std::os::unix::io::RawFd,
    #[cfg(unix)]
    pub pending_data_fd: std::os::unix::io::RawFd,
    #[cfg(unix)]
    pub repair_data_fd: std::os::unix::io::RawFd,
}

/// Self-pipe style readiness notifier: `signal` marks the fd readable, `drain` clears it
/// once the condition has been serviced, `raw_fd` is what a `select`/`poll`/`epoll` loop
/// watches. Unix-only: building an actual portable `select`/`poll`/`WSAEventSelect` wrapper
/// is out of scope here, but exposing *a* fd for the caller's own loop to watch is still
/// worth doing, and a non-blocking self-pipe is simplest to build Unix-first.
#[cfg(unix)]
struct Notifier {
    writer: std::os::unix::net::UnixStream,
    reader: std::os::unix::net::UnixStream,
}

#[cfg(unix)]
impl Notifier {
    fn new() -> io::Result<Self> {
        let (writer, reader) = std::os::unix::net::UnixStream::pair()?;
        writer.set_nonblocking(true)?;
        reader.set_nonblocking(true)?;
        Ok(Self { writer, reader })
    }

    fn signal(&self) {
        use std::io::Write;
        let _ = (&self.writer).write(&[1]);
    }

    fn drain(&self) {
        use std::io::Read;
        let mut buf = [0u8; 64];
        while matches!((&self.reader).read(&mut buf), Ok(n) if n > 0) {}
    }

    fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.reader.as_raw_fd()
    }
}

#[cfg(not(unix))]
struct Notifier;

#[cfg(not(unix))]
impl Notifier {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }
    fn signal(&self) {}
    fn drain(&self) {}
}

/// One item queued for the caller's next `recv`: either a delivered APDU or a one-shot
/// window-reset notification for a peer (a LOST APDU produces exactly one reset event and
/// subsequent APDUs resume).
enum Pending {
    Apdu(Vec<u8>),
    Reset(Tsi),
}

fn map_io_err(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock => Error::WouldBlock,
        io::ErrorKind::NetworkUnreachable => Error::NetworkUnreachable(e.to_string()),
        io::ErrorKind::HostUnreachable => Error::HostUnreachable(e.to_string()),
        _ => Error::Io(e),
    }
}

fn nla_of(addr: SocketAddr) -> Nla {
    match addr.ip() {
        IpAddr::V4(v4) => Nla::V4(v4),
        IpAddr::V6(v6) => Nla::V6(v6),
    }
}

/// Coalesce `sequences` into as few NAK/NNAK-shaped packets as the 63-per-packet bound
/// allows. Shared by the receiver's NAK emission and the source's NNAK emission.
fn chunk_sequences(mut sequences: Vec<u32>) -> Vec<(u32, Option<OptNakList>)> {
    sequences.sort_unstable();
    sequences.dedup();
    sequences
        .chunks(1 + MAX_NAK_LIST_EXTRA)
        .map(|chunk| {
            let (&first, rest) = chunk.split_first().expect("chunks never yields empty slices");
            let list = if rest.is_empty() {
                None
            } else {
                Some(OptNakList {
                    sequences: rest.to_vec(),
                })
            };
            (first, list)
        })
        .collect()
}

/// One process-owned PGM socket: at most one `SourceEngine` (absent when
/// `recv_only`), at most one `ReceiverEngine` (absent when `send_only`), the bound UDP
/// datagram socket, and the bookkeeping `recv`/`send` need to implement blocking, non-blocking,
/// and multiplexed I/O from the caller's own thread — no internal thread is spawned anywhere
/// in this facade.
pub struct PgmSocket {
    config: PgmConfig,
    local_tsi: Tsi,
    local_nla: Nla,
    group_addr: SocketAddr,
    socket: UdpSocket,
    source: Option<SourceEngine>,
    receiver: Option<ReceiverEngine>,
    timer: Mutex<TimerWheel>,
    pending: Mutex<VecDeque<Pending>>,
    reset_pending: Mutex<HashSet<Tsi>>,
    /// Per-sequence wire options (principally `OPT_FRAGMENT`) recorded at send time so a
    /// later RDATA retransmit can reproduce them; the `TransmitWindow` itself only retains
    /// payload bytes. Best-effort: a sequence the TXW has already evicted
    /// yields `None` here too, which is harmless since `peek` would have failed first anyway.
    send_options: Mutex<HashMap<u32, Options>>,
    destroyed: AtomicBool,
    lifecycle: RwLock<()>,
    pending_data: Notifier,
    repair_data: Notifier,
}

impl PgmSocket {
    /// Bind a socket for `group_addr` (the PGM session's multicast or unicast destination),
    /// configuring the OS socket option list (`max_tpdu` validated by
    /// `config.validate`, `sndbuf`/`rcvbuf`, `multicast_hops`, `multicast_loop`) and
    /// joining the multicast group unless this is a `send_only` socket. `local_addr`'s port
    /// becomes the TSI's source port.
    pub fn bind(config: PgmConfig, gsi: Gsi, local_addr: SocketAddr, group_addr: SocketAddr) -> Result<Self> {
        config.validate()?;

        let domain = Domain::for_address(local_addr);
        let raw = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(map_io_err)?;
        raw.set_reuse_address(true).map_err(map_io_err)?;
        raw.set_send_buffer_size(config.sndbuf).map_err(map_io_err)?;
        raw.set_recv_buffer_size(config.rcvbuf).map_err(map_io_err)?;
        raw.bind(&local_addr.into()).map_err(map_io_err)?;

        if group_addr.ip().is_multicast() {
            match group_addr.ip() {
                IpAddr::V4(group) => {
                    let iface = match local_addr.ip() {
                        IpAddr::V4(v4) => v4,
                        IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
                    };
                    if !config.send_only {
                        raw.join_multicast_v4(&group, &iface).map_err(map_io_err)?;
                    }
                    raw.set_multicast_ttl_v4(config.multicast_hops as u32)
                        .map_err(map_io_err)?;
                    raw.set_multicast_loop_v4(config.multicast_loop)
                        .map_err(map_io_err)?;
                }
                IpAddr::V6(group) => {
                    if !config.send_only {
                        raw.join_multicast_v6(&group, 0).map_err(map_io_err)?;
                    }
                    raw.set_multicast_hops_v6(config.multicast_hops as u32)
                        .map_err(map_io_err)?;
                    raw.set_multicast_loop_v6(config.multicast_loop)
                        .map_err(map_io_err)?;
                }
            }
        }

        let socket: UdpSocket = raw.into();
        socket.set_nonblocking(true).map_err(map_io_err)?;

        let local_tsi = Tsi::new(gsi, local_addr.port());
        let local_nla = nla_of(local_addr);
        tracing::info!(tsi = ?local_tsi, %local_addr, %group_addr, "PGM socket bound");

        let source = (!config.recv_only).then(|| SourceEngine::new(local_tsi, config.clone()));
        let receiver = (!config.send_only)
            .then(|| ReceiverEngine::new(config.clone(), local_tsi, local_nla));

        Ok(Self {
            config,
            local_tsi,
            local_nla,
            group_addr,
            socket,
            source,
            receiver,
            timer: Mutex::new(TimerWheel::new()),
            pending: Mutex::new(VecDeque::new()),
            reset_pending: Mutex::new(HashSet::new()),
            send_options: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            lifecycle: RwLock::new(()),
            pending_data: Notifier::new().map_err(map_io_err)?,
            repair_data: Notifier::new().map_err(map_io_err)?,
        })
    }

    pub fn local_tsi(&self) -> Tsi {
        self.local_tsi
    }

    pub fn source_stats(&self) -> Option<&pgm_core::stats::SourceStats> {
        self.source.as_ref().map(|s| &s.stats)
    }

    pub fn peers(&self) -> Option<&crate::peer::PeerTable> {
        self.receiver.as_ref().map(|r| r.peers())
    }

    /// The three readiness descriptors of the multiplexer integration.
    #[cfg(unix)]
    pub fn descriptors(&self) -> SocketDescriptors {
        use std::os::unix::io::AsRawFd;
        SocketDescriptors {
            recv_fd: self.socket.as_raw_fd(),
            pending_data_fd: self.pending_data.raw_fd(),
            repair_data_fd: self.repair_data.raw_fd(),
        }
    }

    /// Fragment and send `buf` as one APDU. Rate-limiting, nonblocking
    /// would-block, and argument validation surface through the shared `Error` taxonomy
    /// (`RateLimited`, `WouldBlock`, `InvalidArgument`) rather than a parallel status enum,
    /// since unlike `recv` there is no payload to carry alongside the success case.
    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let _guard = self.lifecycle.read();
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::Eof);
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("recv_only socket cannot send"))?;

        let packets = source.send(buf, self.config.nonblocking, Instant::now())?;
        for packet in &packets {
            if let Body::Odata(body) = &packet.body {
                self.send_options
                    .lock()
                    .insert(body.sequence, packet.options.clone());
            }
            self.write_packet(packet, self.group_addr)?;
        }
        Ok(())
    }

    fn write_packet(&self, packet: &Packet, dest: SocketAddr) -> Result<()> {
        let frame = packet.encode();
        self.socket.send_to(&frame, dest).map_err(map_io_err)?;
        Ok(())
    }

    /// Deliver the next complete APDU. Drives ingress (socket reads), NAK/SPM/
    /// SPMR timer dispatch, and the delivered-APDU queue from the calling thread; blocks
    /// (sleeping in small steps bounded by the next timer deadline) unless `nonblocking` is
    /// configured.
    pub fn recv(&self) -> RecvStatus {
        let _guard = self.lifecycle.read();
        loop {
            if let Some(p) = self.pending.lock().pop_front() {
                return match p {
                    Pending::Apdu(apdu) => RecvStatus::Normal(apdu),
                    Pending::Reset(tsi) => {
                        self.reset_pending.lock().remove(&tsi);
                        RecvStatus::Reset
                    }
                };
            }
            if self.destroyed.load(Ordering::Acquire) {
                return RecvStatus::Eof;
            }

            match self.drain_socket() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return RecvStatus::Error(e),
            }
            if !self.pending.lock().is_empty() {
                continue;
            }

            let now = Instant::now();
            let due = {
                let mut timer = self.timer.lock();
                timer.prepare(now, self.deadline_sources(now))
            };
            if due {
                self.dispatch_due(now);
                continue;
            }

            let next_poll = self.timer.lock().next_poll();
            if self.config.nonblocking {
                return match next_poll {
                    Some(_) => RecvStatus::TimerPending(self.timer.lock().expiration(now)),
                    None => RecvStatus::WouldBlock,
                };
            }

            let remaining = self.timer.lock().expiration(now);
            let sleep_for = remaining
                .min(Duration::from_millis(50))
                .max(Duration::from_millis(1));
            std::thread::sleep(sleep_for);
        }
    }

    /// Every live deadline this socket's timer should fold in: the source's SPM/heartbeat
    /// clock, and every peer's back-off/NCF/RDATA/SPMR/expiry deadlines.
    fn deadline_sources(&self, now: Instant) -> Vec<Option<Instant>> {
        let mut sources = Vec::with_capacity(2);
        sources.push(self.source.as_ref().map(|s| s.spm_deadline(now)));
        sources.push(self.receiver.as_ref().and_then(|r| r.next_deadline()));
        sources
    }

    /// Emit whichever SPM is due and service every peer's due timers
    /// via `dispatch_peers`.
    fn dispatch_due(&self, now: Instant) {
        if let Some(source) = &self.source {
            if now >= source.spm_deadline(now) {
                let packet = source.build_spm_packet(self.local_nla);
                if self.write_packet(&packet, self.group_addr).is_ok() {
                    source.on_spm_sent(now);
                }
            }
        }
        if let Some(receiver) = &self.receiver {
            for event in receiver.dispatch_peers(now) {
                self.handle_receiver_event(event);
            }
        }
    }

    /// Drain every currently-readable datagram, dispatching each to the source or receiver
    /// engine. Returns whether at least one datagram was processed (so `recv` knows to
    /// re-check its delivered queue before deciding whether to block).
    fn drain_socket(&self) -> Result<bool> {
        let mut progressed = false;
        let mut buf = [0u8; 65536];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    progressed = true;
                    self.on_frame(&buf[..n], from, Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(map_io_err(e)),
            }
        }
        Ok(progressed)
    }

    /// Parse and route one received frame. A packet that fails to parse (bad checksum,
    /// truncated body/options) is discarded silently and never surfaced through `recv`.
    fn on_frame(&self, frame: &[u8], from: SocketAddr, now: Instant) {
        let packet = match Packet::decode(frame) {
            Ok(p) => p,
            Err(err) => {
                tracing::debug!(%from, %err, len = frame.len(), "discarding malformed packet");
                return;
            }
        };

        let from_tsi = Tsi::new(Gsi(packet.gsi), packet.source_port);

        match &packet.body {
            Body::Nak(_) | Body::Nnak(_) => {
                if from_tsi != self.local_tsi {
                    self.on_nak(&packet, from);
                }
            }
            Body::Spmr => {
                if let Some(source) = &self.source {
                    if source.on_spmr(now) {
                        let reply = source.build_spm_packet(self.local_nla);
                        let _ = self.write_packet(&reply, self.group_addr);
                    }
                }
            }
            _ => {
                if let Some(receiver) = &self.receiver {
                    if from_tsi == self.local_tsi {
                        return; // our own multicast loopback, not a peer
                    }
                    for event in receiver.on_packet(from_tsi, &packet, now) {
                        self.handle_receiver_event(event);
                    }
                }
            }
        }
    }

    /// A NAK/N-NAK arrived for this socket's own source identity: resolve it against the
    /// TXW, retransmit what is still retained, and answer what is not with an NNAK.
    /// `from` is only a fallback destination for the NNAK reply — the requesting
    /// receiver's own port (carried in the NAK packet itself) is preferred.
    fn on_nak(&self, packet: &Packet, from: SocketAddr) {
        let Some(source) = &self.source else { return };
        let body = match &packet.body {
            Body::Nak(b) | Body::Nnak(b) => b,
            _ => return,
        };
        let mut sequences = vec![body.requested_sequence];
        if let Some(list) = &packet.options.nak_list {
            sequences.extend(list.sequences.iter().copied());
        }

        let (retransmit, unrecoverable) = source.on_nak(&sequences);
        let trail = source.trail();
        let mut bytes = 0u64;
        for skb in retransmit {
            let options = self
                .send_options
                .lock()
                .get(&skb.sequence)
                .cloned()
                .unwrap_or_default();
            let rdata = Packet {
                source_port: self.local_tsi.source_port,
                dest_port: self.local_tsi.source_port,
                gsi: self.local_tsi.gsi.0,
                body: Body::Rdata(DataBody {
                    sequence: skb.sequence,
                    trail,
                    payload: skb.data().to_vec(),
                }),
                options,
            };
            bytes += skb.len() as u64;
            let _ = self.write_packet(&rdata, self.group_addr);
            self.repair_data.signal();
        }
        if bytes > 0 {
            pgm_core::stats::SourceStats::inc(&source.stats.selective_bytes_retransmitted, bytes);
            pgm_core::stats::SourceStats::inc(&source.stats.selective_nak_packets_sent, 1);
        }

        if !unrecoverable.is_empty() {
            let reply_port = packet.source_port;
            for (requested_sequence, nak_list) in chunk_sequences(unrecoverable) {
                let nnak = Packet {
                    source_port: self.local_tsi.source_port,
                    dest_port: reply_port,
                    gsi: self.local_tsi.gsi.0,
                    body: Body::Nnak(NakBody {
                        requested_sequence,
                        source_nla: self.local_nla,
                        group_nla: body.group_nla,
                    }),
                    options: Options {
                        fragment: None,
                        nak_list,
                        parity: false,
                    },
                };
                let _ = self.write_packet(&nnak, from);
            }
        }
    }

    /// Translate one receiver-side outcome into wire I/O, the delivered-APDU queue, or a
    /// one-shot reset notification.
    fn handle_receiver_event(&self, event: ReceiverEvent) {
        match event {
            ReceiverEvent::Delivered { apdu, .. } => {
                self.pending.lock().push_back(Pending::Apdu(apdu));
                self.pending_data.signal();
            }
            ReceiverEvent::Nak { packet, .. } => {
                let dest = self.peer_reply_addr(&packet);
                let _ = self.write_packet(&packet, dest);
            }
            ReceiverEvent::Spmr { packet, .. } => {
                let dest = self.peer_reply_addr(&packet);
                let _ = self.write_packet(&packet, dest);
            }
            ReceiverEvent::Loss { tsi, .. } => {
                if self.reset_pending.lock().insert(tsi) {
                    self.pending.lock().push_back(Pending::Reset(tsi));
                }
            }
            ReceiverEvent::PeerExpired { .. } => {}
        }
    }

    /// NAK/SPMR replies are unicast to the source's last-known NLA when we have one on file,
    /// falling back to the group address (multicast) so the source sees it regardless.
    fn peer_reply_addr(&self, packet: &Packet) -> SocketAddr {
        let tsi = Tsi::new(Gsi(packet.gsi), packet.dest_port);
        if let Some(receiver) = &self.receiver {
            if let Some(peer) = receiver.peers().get(&tsi) {
                if let Some(nla) = peer.lock().nla {
                    return socket_addr_of(nla, packet.dest_port);
                }
            }
        }
        self.group_addr
    }

    /// Close the socket: concurrent callers observe `destroyed` and return
    /// `Eof`. `flush = true` keeps already-delivered-but-unread APDUs queued for one last
    /// drain; `flush = false` discards them immediately.
    pub fn close(&self, flush: bool) {
        let _guard = self.lifecycle.write();
        tracing::info!(tsi = ?self.local_tsi, flush, "closing PGM socket");
        self.destroyed.store(true, Ordering::SeqCst);
        if !flush {
            self.pending.lock().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Clear the pending-data readiness fd once the caller's multiplexer loop has reacted to
    /// it and drained what it wants from `recv`.
    pub fn acknowledge_pending_data(&self) {
        self.pending_data.drain();
    }

    /// Clear the repair-data readiness fd once the caller's multiplexer loop has observed a
    /// retransmit was sent.
    pub fn acknowledge_repair_data(&self) {
        self.repair_data.drain();
    }
}

fn socket_addr_of(nla: Nla, port: u16) -> SocketAddr {
    match nla {
        Nla::V4(v4) => SocketAddr::new(IpAddr::V4(v4), port),
        Nla::V6(v6) => SocketAddr::new(IpAddr::V6(v6), port),
    }
}
