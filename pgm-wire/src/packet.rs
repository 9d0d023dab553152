//! Full-frame assembly: header, body, and trailing option chain.

use crate::body::{DataBody, NakBody, SpmBody};
use crate::header::{write_checksum, OptionsFlags, PgmHeader, HEADER_LEN};
use crate::options::Options;
use crate::PacketType;
use pgm_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Spm(SpmBody),
    Odata(DataBody),
    Rdata(DataBody),
    Nak(NakBody),
    Nnak(NakBody),
    Ncf(NakBody),
    Spmr,
}

impl Body {
    fn packet_type(&self) -> PacketType {
        match self {
            Body::Spm(_) => PacketType::Spm,
            Body::Odata(_) => PacketType::Odata,
            Body::Rdata(_) => PacketType::Rdata,
            Body::Nak(_) => PacketType::Nak,
            Body::Nnak(_) => PacketType::Nnak,
            Body::Ncf(_) => PacketType::Ncf,
            Body::Spmr => PacketType::Spmr,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Body::Spm(b) => b.encode(out),
            Body::Odata(b) | Body::Rdata(b) => b.encode(out),
            Body::Nak(b) | Body::Nnak(b) | Body::Ncf(b) => b.encode(out),
            Body::Spmr => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source_port: u16,
    pub dest_port: u16,
    pub gsi: [u8; 6],
    pub body: Body,
    pub options: Options,
}

impl Packet {
    /// Serialize into a fresh frame buffer with a correctly stamped checksum and `tsdu_length`
    /// header field (RFC 3208 leaves `tsdu_length` meaningful for ODATA/RDATA only; other
    /// types carry 0).
    pub fn encode(&self) -> Vec<u8> {
        let mut body_bytes = Vec::new();
        self.body.encode(&mut body_bytes);
        let option_bytes = self.options.encode();

        let tsdu_length = match &self.body {
            Body::Odata(b) | Body::Rdata(b) => b.payload.len() as u16,
            _ => 0,
        };

        let mut options_flags = OptionsFlags::empty();
        if !self.options.is_empty() {
            options_flags |= OptionsFlags::PRESENT;
            if self.options.fragment.is_some() {
                options_flags |= OptionsFlags::NETWORK_SIGNIFICANT;
            }
        }
        if self.options.parity {
            options_flags |= OptionsFlags::PARITY;
        }

        let header = PgmHeader {
            source_port: self.source_port,
            dest_port: self.dest_port,
            packet_type: self.body.packet_type(),
            options: options_flags,
            gsi: self.gsi,
            tsdu_length,
        };

        let mut frame = vec![0u8; HEADER_LEN];
        header.encode(&mut frame).expect("fixed-size header buffer");
        frame.extend_from_slice(&body_bytes);
        frame.extend_from_slice(&option_bytes);
        write_checksum(&mut frame);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if !crate::header::verify_checksum(frame) {
            return Err(Error::malformed("PGM checksum mismatch"));
        }
        let header = PgmHeader::decode(frame)?;
        let rest = &frame[HEADER_LEN..];

        let (body, body_len) = match header.packet_type {
            PacketType::Spm => {
                let b = SpmBody::decode(rest)?;
                let len = 16 + b.source_nla.encoded_len();
                (Body::Spm(b), len)
            }
            PacketType::Odata => {
                let len = DataBody::FIXED_LEN + header.tsdu_length as usize;
                if rest.len() < len {
                    return Err(Error::malformed("truncated ODATA payload"));
                }
                (Body::Odata(DataBody::decode(&rest[..len])?), len)
            }
            PacketType::Rdata => {
                let len = DataBody::FIXED_LEN + header.tsdu_length as usize;
                if rest.len() < len {
                    return Err(Error::malformed("truncated RDATA payload"));
                }
                (Body::Rdata(DataBody::decode(&rest[..len])?), len)
            }
            PacketType::Nak => {
                let b = NakBody::decode(rest)?;
                let len = b.encoded_len();
                (Body::Nak(b), len)
            }
            PacketType::Nnak => {
                let b = NakBody::decode(rest)?;
                let len = b.encoded_len();
                (Body::Nnak(b), len)
            }
            PacketType::Ncf => {
                let b = NakBody::decode(rest)?;
                let len = b.encoded_len();
                (Body::Ncf(b), len)
            }
            PacketType::Spmr => (Body::Spmr, 0),
        };

        let options = if header.options.contains(OptionsFlags::PRESENT) {
            Options::decode(&rest[body_len..])?
        } else {
            Options::default()
        };

        Ok(Self {
            source_port: header.source_port,
            dest_port: header.dest_port,
            gsi: header.gsi,
            body,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nla::Nla;
    use std::net::Ipv4Addr;

    #[test]
    fn odata_packet_round_trips() {
        let packet = Packet {
            source_port: 7500,
            dest_port: 7500,
            gsi: [9, 8, 7, 6, 5, 4],
            body: Body::Odata(DataBody {
                sequence: 1,
                trail: 0,
                payload: b"hello pgm".to_vec(),
            }),
            options: Options::default(),
        };
        let frame = packet.encode();
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn spm_packet_with_fragment_option_round_trips() {
        let packet = Packet {
            source_port: 1000,
            dest_port: 1000,
            gsi: [0; 6],
            body: Body::Spm(SpmBody {
                spm_sequence: 4,
                trail: 0,
                lead: 10,
                source_nla: Nla::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }),
            options: Options {
                fragment: None,
                nak_list: None,
                parity: false,
            },
        };
        let frame = packet.encode();
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let packet = Packet {
            source_port: 1,
            dest_port: 1,
            gsi: [0; 6],
            body: Body::Spmr,
            options: Options::default(),
        };
        let mut frame = packet.encode();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(Packet::decode(&frame).is_err());
    }

    #[test]
    fn fragmented_odata_with_nak_list_round_trips() {
        let packet = Packet {
            source_port: 2000,
            dest_port: 2000,
            gsi: [1; 6],
            body: Body::Nak(NakBody {
                requested_sequence: 50,
                source_nla: Nla::V4(Ipv4Addr::new(192, 168, 1, 1)),
                group_nla: Nla::V4(Ipv4Addr::new(239, 0, 0, 1)),
            }),
            options: Options {
                fragment: None,
                nak_list: Some(crate::options::OptNakList {
                    sequences: vec![51, 52, 53],
                }),
                parity: false,
            },
        };
        let frame = packet.encode();
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded, packet);
    }
}
