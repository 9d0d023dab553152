#![forbid(unsafe_code)]

//! Transmit window (source-side retention) and per-peer receive window (the NAK/NCF/RDATA
//! state machine plus APDU reassembly).

pub mod reassembly;
pub mod rxw;
pub mod txw;

pub use reassembly::ReassemblyTable;
pub use rxw::{ReceiveWindow, RxwAction, SqnState};
pub use txw::TransmitWindow;
