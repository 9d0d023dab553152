//! Transport Session Identifier: (GSI, source port).

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

/// 6-byte opaque Global Session Identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gsi(pub [u8; 6]);

impl Gsi {
    /// Derive a GSI from an already-resolved hostname string plus a random salt.
    /// Hostname/address resolution itself stays out of scope; callers supply the resolved
    /// string.
    pub fn from_hostname(hostname: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(hostname.as_bytes());
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        hasher.update(salt);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&digest[..6]);
        Self(bytes)
    }

    /// A fully random GSI, used when no stable host fingerprint is available.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl core::fmt::Display for Gsi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Transport Session Identifier: uniquely names a sending session.
/// Two TSIs compare equal iff all 8 bytes (GSI + source port) match.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Tsi {
    pub gsi: Gsi,
    pub source_port: u16,
}

impl Tsi {
    pub fn new(gsi: Gsi, source_port: u16) -> Self {
        Self { gsi, source_port }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..6].copy_from_slice(&self.gsi.0);
        out[6..].copy_from_slice(&self.source_port.to_be_bytes());
        out
    }
}

impl PartialEq for Tsi {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Hash for Tsi {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl core::fmt::Display for Tsi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.gsi, self.source_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tsis_hash_equal() {
        let gsi = Gsi([1, 2, 3, 4, 5, 6]);
        let a = Tsi::new(gsi, 7500);
        let b = Tsi::new(gsi, 7500);
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn differing_port_not_equal() {
        let gsi = Gsi([1, 2, 3, 4, 5, 6]);
        let a = Tsi::new(gsi, 7500);
        let b = Tsi::new(gsi, 7501);
        assert_ne!(a, b);
    }
}
