#![forbid(unsafe_code)]

//! Unified per-socket expiration timer of the design: `next_poll` computation across every
//! live deadline source, the SPM heartbeat cadence, and a reusable deadline-ordered heap for
//! per-peer lifecycle timers.

pub mod deadline_heap;
pub mod spm_schedule;
pub mod wheel;

pub use deadline_heap::DeadlineHeap;
pub use spm_schedule::SpmSchedule;
pub use wheel::{Dispatchable, TimerWheel};
