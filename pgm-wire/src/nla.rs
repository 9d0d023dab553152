//! Network Layer Address encoding: an AFI selects the address family and width
//! embedded inline in SPM/NAK/NCF bodies (IANA AFI 1 = IPv4, 2 = IPv6).

use pgm_core::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

const AFI_IP4: u16 = 1;
const AFI_IP6: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nla {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Nla {
    pub fn afi(&self) -> u16 {
        match self {
            Nla::V4(_) => AFI_IP4,
            Nla::V6(_) => AFI_IP6,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Nla::V4(_) => 4,
            Nla::V6(_) => 16,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < self.encoded_len() {
            return Err(Error::invalid_argument("buffer too small for NLA"));
        }
        match self {
            Nla::V4(a) => buf[..4].copy_from_slice(&a.octets()),
            Nla::V6(a) => buf[..16].copy_from_slice(&a.octets()),
        }
        Ok(())
    }

    pub fn decode(afi: u16, buf: &[u8]) -> Result<Self> {
        match afi {
            AFI_IP4 => {
                if buf.len() < 4 {
                    return Err(Error::malformed("truncated IPv4 NLA"));
                }
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&buf[..4]);
                Ok(Nla::V4(Ipv4Addr::from(octets)))
            }
            AFI_IP6 => {
                if buf.len() < 16 {
                    return Err(Error::malformed("truncated IPv6 NLA"));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                Ok(Nla::V6(Ipv6Addr::from(octets)))
            }
            other => Err(Error::malformed(format!("unknown NLA-AFI {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips() {
        let nla = Nla::V4(Ipv4Addr::new(203, 0, 113, 7));
        let mut buf = [0u8; 4];
        nla.encode(&mut buf).unwrap();
        assert_eq!(Nla::decode(nla.afi(), &buf).unwrap(), nla);
    }

    #[test]
    fn v6_round_trips() {
        let nla = Nla::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let mut buf = [0u8; 16];
        nla.encode(&mut buf).unwrap();
        assert_eq!(Nla::decode(nla.afi(), &buf).unwrap(), nla);
    }

    #[test]
    fn unknown_afi_rejected() {
        assert!(Nla::decode(99, &[0u8; 16]).is_err());
    }
}
