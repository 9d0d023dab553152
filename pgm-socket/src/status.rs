//! `recv*` outcome: one of NORMAL/WOULD_BLOCK/RATE_LIMITED/TIMER_PENDING/
//! RESET/FIN/EOF/ERROR.

use pgm_core::Error;
use std::time::Duration;

#[derive(Debug)]
pub enum RecvStatus {
 /// Data delivered: one complete APDU (possibly reassembled from fragments).
 Normal(Vec<u8>),
 /// Nonblocking call had nothing ready.
 WouldBlock,
 /// Caller should wait `rate_remain` before retrying a send that hit the rate regulator.
 RateLimited(Duration),
 /// No delivery ready; caller should wait `time_remain` (the timer's `next_poll`) and
 /// retry.
 TimerPending(Duration),
 /// A peer's transmit window reset underneath us; continuable unless `abort_on_reset`.
 Reset,
 /// The source declared its session finished.
 Fin,
 /// The socket itself has been closed.
 Eof,
 /// Fatal; detail carried in the wrapped error.
 Error(Error),
}

impl RecvStatus {
 /// False for terminal outcomes (`Eof`/`Error`), and for `Reset` once `abort_on_reset`
 /// promotes it to a terminal error.
 pub fn is_continuable(&self, abort_on_reset: bool) -> bool {
 match self {
 RecvStatus::Eof | RecvStatus::Error(_) => false,
 RecvStatus::Reset => !abort_on_reset,
 _ => true,
 }
 }
}
