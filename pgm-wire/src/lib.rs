#![forbid(unsafe_code)]

//! Bit-exact PGM wire codec (RFC 3208): the 16-byte common header, per-type bodies, option
//! extensions, and the one's-complement checksum.

pub mod body;
pub mod checksum;
pub mod header;
pub mod nla;
pub mod options;
pub mod packet;
pub mod packet_type;

pub use body::{DataBody, NakBody, SpmBody};
pub use header::{OptionsFlags, PgmHeader, HEADER_LEN};
pub use nla::Nla;
pub use options::{OptFragment, OptNakList, OptParity, Options, MAX_NAK_LIST_EXTRA};
pub use packet::{Body, Packet};
pub use packet_type::PacketType;
