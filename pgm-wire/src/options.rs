//! PGM option extensions: each option is a TLV-ish
//! `type(1) | length(1) | value` chained after the type's fixed body, terminated implicitly
//! by the header's `PRESENT` bit being clear on the last extension.

use pgm_core::{Error, Result};

pub const OPT_FRAGMENT: u8 = 0x01;
pub const OPT_NAK_LIST: u8 = 0x02;
pub const OPT_PARITY: u8 = 0x08;

/// Maximum additional sequences an OPT_NAK_LIST may coalesce beyond the body's own
/// requested-sequence.
pub const MAX_NAK_LIST_EXTRA: usize = 62;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptFragment {
    pub first_sequence: u32,
    pub fragment_offset: u32,
    pub apdu_length: u32,
}

impl OptFragment {
    pub const LEN: usize = 12;

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(OPT_FRAGMENT);
        out.push((2 + Self::LEN) as u8);
        out.extend_from_slice(&self.first_sequence.to_be_bytes());
        out.extend_from_slice(&self.fragment_offset.to_be_bytes());
        out.extend_from_slice(&self.apdu_length.to_be_bytes());
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        if value.len() < Self::LEN {
            return Err(Error::malformed("truncated OPT_FRAGMENT"));
        }
        Ok(Self {
            first_sequence: u32::from_be_bytes(value[0..4].try_into().unwrap()),
            fragment_offset: u32::from_be_bytes(value[4..8].try_into().unwrap()),
            apdu_length: u32::from_be_bytes(value[8..12].try_into().unwrap()),
        })
    }
}

/// Up to `MAX_NAK_LIST_EXTRA` additional requested sequences, coalesced onto one NAK/NCF to
/// cut packet count for bursty loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptNakList {
    pub sequences: Vec<u32>,
}

impl OptNakList {
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.sequences.len() > MAX_NAK_LIST_EXTRA {
            return Err(Error::invalid_argument(format!(
                "OPT_NAK_LIST carries at most {MAX_NAK_LIST_EXTRA} extra sequences, got {}",
                self.sequences.len()
            )));
        }
        out.push(OPT_NAK_LIST);
        out.push((2 + self.sequences.len() * 4) as u8);
        for seq in &self.sequences {
            out.extend_from_slice(&seq.to_be_bytes());
        }
        Ok(())
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        if value.len() % 4 != 0 {
            return Err(Error::malformed("OPT_NAK_LIST length not a multiple of 4"));
        }
        let count = value.len() / 4;
        if count > MAX_NAK_LIST_EXTRA {
            return Err(Error::malformed("OPT_NAK_LIST exceeds 62 extra sequences"));
        }
        let sequences = value
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        Ok(Self { sequences })
    }
}

/// OPT_PARITY carries no value; presence alone marks the packet as a parity (RDATA/NAK)
/// variant, mirrored by the header's own `PARITY` options bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptParity;

impl OptParity {
    pub fn encode(out: &mut Vec<u8>) {
        out.push(OPT_PARITY);
        out.push(2);
    }
}

/// A parsed option extension chain: at most one of each kind, per packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub fragment: Option<OptFragment>,
    pub nak_list: Option<OptNakList>,
    pub parity: bool,
}

impl Options {
    /// Parse a chain of `type|length|value` TLVs from `buf`, stopping at the end of the
    /// slice (the header's PRESENT bit gates whether this parse is attempted at all).
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut opts = Options::default();
        while !buf.is_empty() {
            if buf.len() < 2 {
                return Err(Error::malformed("truncated option header"));
            }
            let kind = buf[0];
            let len = buf[1] as usize;
            if len < 2 || buf.len() < len {
                return Err(Error::malformed("option length out of range"));
            }
            let value = &buf[2..len];
            match kind {
                OPT_FRAGMENT => opts.fragment = Some(OptFragment::decode(value)?),
                OPT_NAK_LIST => opts.nak_list = Some(OptNakList::decode(value)?),
                OPT_PARITY => opts.parity = true,
                other => {
                    return Err(Error::malformed(format!("unknown option type 0x{other:02x}")))
                }
            }
            buf = &buf[len..];
        }
        Ok(opts)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(frag) = &self.fragment {
            frag.encode(&mut out);
        }
        if let Some(list) = &self.nak_list {
            // Caller is expected to have validated the 62-entry cap already.
            list.encode(&mut out).expect("validated before encode");
        }
        if self.parity {
            OptParity::encode(&mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.fragment.is_none() && self.nak_list.is_none() && !self.parity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_option_round_trips() {
        let frag = OptFragment {
            first_sequence: 100,
            fragment_offset: 0,
            apdu_length: 4096,
        };
        let mut buf = Vec::new();
        frag.encode(&mut buf);
        let opts = Options::decode(&buf).unwrap();
        assert_eq!(opts.fragment, Some(frag));
    }

    #[test]
    fn nak_list_round_trips_and_rejects_oversize() {
        let list = OptNakList {
            sequences: (0..MAX_NAK_LIST_EXTRA as u32).collect(),
        };
        let mut buf = Vec::new();
        list.encode(&mut buf).unwrap();
        let opts = Options::decode(&buf).unwrap();
        assert_eq!(opts.nak_list, Some(list));

        let too_many = OptNakList {
            sequences: vec![0; MAX_NAK_LIST_EXTRA + 1],
        };
        let mut buf = Vec::new();
        assert!(too_many.encode(&mut buf).is_err());
    }

    #[test]
    fn chain_of_options_round_trips() {
        let opts = Options {
            fragment: Some(OptFragment {
                first_sequence: 1,
                fragment_offset: 512,
                apdu_length: 2048,
            }),
            nak_list: Some(OptNakList {
                sequences: vec![5, 6, 7],
            }),
            parity: true,
        };
        let encoded = opts.encode();
        let decoded = Options::decode(&encoded).unwrap();
        assert_eq!(opts, decoded);
    }

    #[test]
    fn empty_chain_decodes_to_empty() {
        let opts = Options::decode(&[]).unwrap();
        assert!(opts.is_empty());
    }
}
