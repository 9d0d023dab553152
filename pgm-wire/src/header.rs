//! The 16-byte PGM common header.

use crate::checksum::checksum16;
use crate::PacketType;
use pgm_core::{Error, Result};

pub const HEADER_LEN: usize = 16;

bitflags::bitflags! {
    /// Options byte: 0x01 present (more option extensions follow), 0x02
    /// network-significant, 0x80 parity, 0x40 var-pktlen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionsFlags: u8 {
        const PRESENT = 0x01;
        const NETWORK_SIGNIFICANT = 0x02;
        const VAR_PKTLEN = 0x40;
        const PARITY = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgmHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub packet_type: PacketType,
    pub options: OptionsFlags,
    pub gsi: [u8; 6],
    pub tsdu_length: u16,
}

impl PgmHeader {
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(Error::invalid_argument("buffer too small for PGM header"));
        }
        buf[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[4] = self.packet_type as u8;
        buf[5] = self.options.bits();
        buf[6..8].copy_from_slice(&[0, 0]); // checksum placeholder, filled below
        buf[8..14].copy_from_slice(&self.gsi);
        buf[14..16].copy_from_slice(&self.tsdu_length.to_be_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::malformed("packet shorter than PGM header"));
        }
        let packet_type = PacketType::from_u8(buf[4])
            .ok_or_else(|| Error::malformed(format!("unknown packet type 0x{:02x}", buf[4])))?;
        let mut gsi = [0u8; 6];
        gsi.copy_from_slice(&buf[8..14]);
        Ok(Self {
            source_port: u16::from_be_bytes([buf[0], buf[1]]),
            dest_port: u16::from_be_bytes([buf[2], buf[3]]),
            packet_type,
            options: OptionsFlags::from_bits_truncate(buf[5]),
            gsi,
            tsdu_length: u16::from_be_bytes([buf[14], buf[15]]),
        })
    }
}

/// Stamp the header's checksum field over `frame` (header + body): the 16-bit
/// one's-complement sum of the whole frame with the checksum field taken as zero.
pub fn write_checksum(frame: &mut [u8]) {
    debug_assert!(frame.len() >= HEADER_LEN);
    frame[6] = 0;
    frame[7] = 0;
    let sum = checksum16(frame);
    frame[6..8].copy_from_slice(&sum.to_be_bytes());
}

/// Verify a received frame's checksum. A non-zero one's-complement sum over the
/// whole frame (checksum field included, unmodified) indicates corruption.
pub fn verify_checksum(frame: &[u8]) -> bool {
    frame.len() >= HEADER_LEN && checksum16(frame) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> PgmHeader {
        PgmHeader {
            source_port: 7500,
            dest_port: 7500,
            packet_type: PacketType::Odata,
            options: OptionsFlags::empty(),
            gsi: [1, 2, 3, 4, 5, 6],
            tsdu_length: 128,
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let header = sample_header();
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf).unwrap();
        let decoded = PgmHeader::decode(&buf).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn checksum_round_trips_and_detects_corruption() {
        let header = sample_header();
        let mut frame = vec![0u8; HEADER_LEN + 4];
        header.encode(&mut frame).unwrap();
        frame[HEADER_LEN..].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        write_checksum(&mut frame);
        assert!(verify_checksum(&frame));

        frame[HEADER_LEN] ^= 0xFF;
        assert!(!verify_checksum(&frame));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut buf = [0u8; HEADER_LEN];
        buf[4] = 0xFF;
        assert!(PgmHeader::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(PgmHeader::decode(&[0u8; 4]).is_err());
    }
}
