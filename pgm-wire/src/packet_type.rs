//! PGM packet type codes.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
 Spm = 0x00,
 Odata = 0x04,
 Rdata = 0x05,
 Nak = 0x08,
 Nnak = 0x09,
 Ncf = 0x0A,
 Spmr = 0x0C,
}

impl PacketType {
 pub fn from_u8(v: u8) -> Option<Self> {
 match v {
 0x00 => Some(Self::Spm),
 0x04 => Some(Self::Odata),
 0x05 => Some(Self::Rdata),
 0x08 => Some(Self::Nak),
 0x09 => Some(Self::Nnak),
 0x0A => Some(Self::Ncf),
 0x0C => Some(Self::Spmr),
 _ => None,
 }
 }

 pub fn is_data(self) -> bool {
 matches!(self, Self::Odata | Self::Rdata)
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn round_trips_all_known_codes() {
 for t in [
 PacketType::Spm,
 PacketType::Odata,
 PacketType::Rdata,
 PacketType::Nak,
 PacketType::Nnak,
 PacketType::Ncf,
 PacketType::Spmr,
 ] {
 assert_eq!(PacketType::from_u8(t as u8), Some(t));
 }
 }

 #[test]
 fn unknown_code_rejected() {
 assert_eq!(PacketType::from_u8(0x7F), None);
 }
}
