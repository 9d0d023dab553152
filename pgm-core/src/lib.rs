#![forbid(unsafe_code)]

//! Core types shared across the PGM crates: transport session identifiers, sequence-number
//! arithmetic, the socket-buffer handle, configuration, error taxonomy, process lifecycle,
//! and observable counters.

pub mod config;
pub mod engine;
pub mod error;
pub mod seq;
pub mod skb;
pub mod stats;
pub mod time;

pub use config::PgmConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use skb::{Skb, SkbHandle};
pub use tsi::{Gsi, Tsi};

pub mod tsi;
