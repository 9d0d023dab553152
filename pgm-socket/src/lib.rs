#![forbid(unsafe_code)]

//! Socket-facing API: the engines in this crate turn the codec in
//! `pgm_wire` and the windows in `pgm_window` into a usable transport — fragmenting send,
//! NAK-driven repair, FEC, SPM/SPMR heartbeats, and the configuration surface a caller tunes
//! all the way up to a blocking, non-blocking, or multiplexed `PgmSocket`.

pub mod peer;
pub mod rate;
pub mod receiver;
pub mod socket;
pub mod source;
pub mod status;

pub use peer::{Peer, PeerFec, PeerTable};
pub use rate::RateBucket;
pub use receiver::{ReceiverEngine, ReceiverEvent};
pub use socket::PgmSocket;
pub use source::SourceEngine;
pub use status::RecvStatus;

/// Bytes a single-fragment ODATA/RDATA packet adds on top of its TSDU payload: the 16-byte
/// common header plus a full OPT_FRAGMENT TLV (2-byte option header + 12-byte fragment body),
/// the worst case `send` must budget for since fragmentation is decided after rate-checking
/// each chunk's wire size.
pub const HEADER_AND_OPTS_OVERHEAD: usize = pgm_wire::HEADER_LEN + 2 + 12;
