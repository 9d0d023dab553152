//! Per-type packet bodies.

use crate::nla::Nla;
use pgm_core::{Error, Result};

/// ODATA/RDATA body: data-sequence, trailing-sequence, then the TSDU payload. RDATA reuses
/// the original data-sequence rather than minting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBody {
    pub sequence: u32,
    pub trail: u32,
    pub payload: Vec<u8>,
}

impl DataBody {
    pub const FIXED_LEN: usize = 8;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.trail.to_be_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::FIXED_LEN {
            return Err(Error::malformed("truncated ODATA/RDATA body"));
        }
        Ok(Self {
            sequence: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            trail: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            payload: buf[Self::FIXED_LEN..].to_vec(),
        })
    }
}

/// SPM body: spm-sequence, trailing-sequence, leading-sequence, then the source NLA with its
/// own AFI/reserved header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpmBody {
    pub spm_sequence: u32,
    pub trail: u32,
    pub lead: u32,
    pub source_nla: Nla,
}

impl SpmBody {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.spm_sequence.to_be_bytes());
        out.extend_from_slice(&self.trail.to_be_bytes());
        out.extend_from_slice(&self.lead.to_be_bytes());
        out.extend_from_slice(&self.source_nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]); // reserved
        let mut nla_buf = vec![0u8; self.source_nla.encoded_len()];
        self.source_nla.encode(&mut nla_buf).expect("sized buffer");
        out.extend_from_slice(&nla_buf);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 16 {
            return Err(Error::malformed("truncated SPM body"));
        }
        let afi = u16::from_be_bytes([buf[12], buf[13]]);
        let source_nla = Nla::decode(afi, &buf[16..])?;
        Ok(Self {
            spm_sequence: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            trail: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            lead: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            source_nla,
        })
    }
}

/// NAK/N-NAK/NCF body: requested-sequence, source NLA (AFI-prefixed), group NLA
/// (AFI-prefixed). NCF reuses this layout verbatim, with the receiver's own NLA as source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakBody {
    pub requested_sequence: u32,
    pub source_nla: Nla,
    pub group_nla: Nla,
}

impl NakBody {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.requested_sequence.to_be_bytes());
        out.extend_from_slice(&self.source_nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        let mut src_buf = vec![0u8; self.source_nla.encoded_len()];
        self.source_nla.encode(&mut src_buf).expect("sized buffer");
        out.extend_from_slice(&src_buf);

        out.extend_from_slice(&self.group_nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        let mut grp_buf = vec![0u8; self.group_nla.encoded_len()];
        self.group_nla.encode(&mut grp_buf).expect("sized buffer");
        out.extend_from_slice(&grp_buf);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(Error::malformed("truncated NAK body"));
        }
        let requested_sequence = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let source_afi = u16::from_be_bytes([buf[4], buf[5]]);
        let source_nla = Nla::decode(source_afi, &buf[8..])?;
        let after_source = 8 + source_nla.encoded_len();

        if buf.len() < after_source + 4 {
            return Err(Error::malformed("truncated NAK body (group NLA header)"));
        }
        let group_afi = u16::from_be_bytes([buf[after_source], buf[after_source + 1]]);
        let group_nla = Nla::decode(group_afi, &buf[after_source + 4..])?;

        Ok(Self {
            requested_sequence,
            source_nla,
            group_nla,
        })
    }

    /// Byte length this body occupies when encoded, needed by option parsers that follow it.
    pub fn encoded_len(&self) -> usize {
        8 + self.source_nla.encoded_len() + 4 + self.group_nla.encoded_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn data_body_round_trips() {
        let body = DataBody {
            sequence: 42,
            trail: 10,
            payload: vec![1, 2, 3, 4, 5],
        };
        let mut buf = Vec::new();
        body.encode(&mut buf);
        assert_eq!(DataBody::decode(&buf).unwrap(), body);
    }

    #[test]
    fn spm_body_round_trips() {
        let body = SpmBody {
            spm_sequence: 1,
            trail: 0,
            lead: 5,
            source_nla: Nla::V4(Ipv4Addr::new(192, 0, 2, 1)),
        };
        let mut buf = Vec::new();
        body.encode(&mut buf);
        assert_eq!(SpmBody::decode(&buf).unwrap(), body);
    }

    #[test]
    fn nak_body_round_trips_with_mixed_afi() {
        let body = NakBody {
            requested_sequence: 77,
            source_nla: Nla::V4(Ipv4Addr::new(198, 51, 100, 1)),
            group_nla: Nla::V4(Ipv4Addr::new(239, 1, 1, 1)),
        };
        let mut buf = Vec::new();
        body.encode(&mut buf);
        let decoded = NakBody::decode(&buf).unwrap();
        assert_eq!(decoded, body);
        assert_eq!(decoded.encoded_len(), buf.len());
    }
}
