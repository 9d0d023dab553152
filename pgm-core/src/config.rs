//! Socket option configuration, loadable from a single top-level TOML document with
//! nested sub-structs per concern. Covers every recognised socket option.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TxwConfig {
    pub sqns: u32,
    pub secs: u32,
    pub max_rte: u32,
}

impl Default for TxwConfig {
    fn default() -> Self {
        Self {
            sqns: 1024,
            secs: 60,
            max_rte: 400_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RxwConfig {
    pub sqns: u32,
    pub secs: u32,
    pub max_rte: u32,
}

impl Default for RxwConfig {
    fn default() -> Self {
        Self {
            sqns: 1024,
            secs: 60,
            max_rte: 400_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NakConfig {
    pub bo_ivl_ms: u64,
    pub rpt_ivl_ms: u64,
    pub rdata_ivl_ms: u64,
    pub data_retries: u32,
    pub ncf_retries: u32,
}

impl Default for NakConfig {
    fn default() -> Self {
        Self {
            bo_ivl_ms: 50,
            rpt_ivl_ms: 200,
            rdata_ivl_ms: 200,
            data_retries: 5,
            ncf_retries: 2,
        }
    }
}

impl NakConfig {
    pub fn bo_ivl(&self) -> Duration {
        Duration::from_millis(self.bo_ivl_ms)
    }
    pub fn rpt_ivl(&self) -> Duration {
        Duration::from_millis(self.rpt_ivl_ms)
    }
    pub fn rdata_ivl(&self) -> Duration {
        Duration::from_millis(self.rdata_ivl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    pub enabled: bool,
    pub n: u8,
    pub k: u8,
    pub proactive_packets: u32,
    pub use_ondemand: bool,
    pub use_varpktlen: bool,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            n: 255,
            k: 64,
            proactive_packets: 0,
            use_ondemand: false,
            use_varpktlen: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpmConfig {
    pub ambient_interval_ms: u64,
    pub heartbeat_ivls_ms: Vec<u64>,
}

impl Default for SpmConfig {
    fn default() -> Self {
        Self {
            ambient_interval_ms: 30_000,
            heartbeat_ivls_ms: vec![100, 100, 100, 100, 1300, 7000, 16_000, 25_000, 30_000],
        }
    }
}

impl SpmConfig {
    pub fn ambient_interval(&self) -> Duration {
        Duration::from_millis(self.ambient_interval_ms)
    }
    pub fn heartbeat_ivls(&self) -> Vec<Duration> {
        self.heartbeat_ivls_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PgmConfig {
    pub max_tpdu: u16,
    pub multicast_loop: bool,
    pub multicast_hops: u8,
    pub sndbuf: usize,
    pub rcvbuf: usize,
    pub txw: TxwConfig,
    pub rxw: RxwConfig,
    pub nak: NakConfig,
    pub spm: SpmConfig,
    pub fec: FecConfig,
    pub peer_expiry_ms: u64,
    pub spmr_expiry_ms: u64,
    pub send_only: bool,
    pub recv_only: bool,
    pub passive: bool,
    pub abort_on_reset: bool,
    pub nonblocking: bool,
    pub udp_encap_ucast_port: Option<u16>,
    pub udp_encap_mcast_port: Option<u16>,
}

impl Default for PgmConfig {
    fn default() -> Self {
        Self {
            max_tpdu: 1500,
            multicast_loop: false,
            multicast_hops: 16,
            sndbuf: 131_072,
            rcvbuf: 131_072,
            txw: TxwConfig::default(),
            rxw: RxwConfig::default(),
            nak: NakConfig::default(),
            spm: SpmConfig::default(),
            fec: FecConfig::default(),
            peer_expiry_ms: 300_000,
            spmr_expiry_ms: 1000,
            send_only: false,
            recv_only: false,
            passive: false,
            abort_on_reset: false,
            nonblocking: false,
            udp_encap_ucast_port: None,
            udp_encap_mcast_port: None,
        }
    }
}

impl PgmConfig {
    pub fn peer_expiry(&self) -> Duration {
        Duration::from_millis(self.peer_expiry_ms)
    }

    pub fn spmr_expiry(&self) -> Duration {
        Duration::from_millis(self.spmr_expiry_ms)
    }

    /// Header + minimal payload overhead that `max_tpdu` must exceed.
    pub const MIN_TPDU_OVERHEAD: u16 = 16 + 8; // PGM common header + ODATA body header

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_tpdu <= Self::MIN_TPDU_OVERHEAD {
            return Err(crate::Error::invalid_argument(
                "max_tpdu must exceed header overhead",
            ));
        }
        if self.send_only && self.recv_only {
            return Err(crate::Error::invalid_argument(
                "send_only and recv_only are mutually exclusive",
            ));
        }
        if self.passive && !self.recv_only {
            return Err(crate::Error::invalid_argument(
                "passive mode requires recv_only",
            ));
        }
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: PgmConfig = toml::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Self::from_file(path)
    }

    /// Maximum TSDU that fits in a single (unfragmented) TPDU.
    pub fn max_tsdu(&self) -> u16 {
        self.max_tpdu - Self::MIN_TPDU_OVERHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PgmConfig::default().validate().is_ok());
    }

    #[test]
    fn min_tpdu_boundary() {
        let mut cfg = PgmConfig::default();
        cfg.max_tpdu = PgmConfig::MIN_TPDU_OVERHEAD + 1;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_tsdu(), 1);
        cfg.max_tpdu = PgmConfig::MIN_TPDU_OVERHEAD;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgm.toml");
        std::fs::write(&path, "max_tpdu = 2000\n[txw]\nsqns = 64\n").unwrap();
        let cfg = PgmConfig::from_file(&path).unwrap();
        assert_eq!(cfg.max_tpdu, 2000);
        assert_eq!(cfg.txw.sqns, 64);
    }
}
