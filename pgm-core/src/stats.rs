//! Observable counters ("each error kind increments a typed counter on the
//! socket or peer; these counters are observable").

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($name:ident { $($field:ident),* $(,)? }) => {
        #[derive(Debug, Default)]
        pub struct $name {
            $(pub $field: AtomicU64,)*
        }

        impl $name {
            $(
                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )*
        }
    };
}

counters!(SourceStats {
    data_bytes_sent,
    data_msgs_sent,
    nak_packets_received,
    nak_errors,
    selective_nak_packets_sent,
    selective_bytes_retransmitted,
    parity_bytes_sent,
    ambient_spm_sent,
    heartbeat_spm_sent,
});

counters!(PeerStats {
    data_bytes_received,
    data_msgs_received,
    dup_packets,
    selective_naks_sent,
    ncf_packets_received,
    lost_packets,
    reset_events,
    malformed_packets,
    fec_packets_reconstructed,
    fec_insufficient,
});

impl SourceStats {
    pub fn inc(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

impl PeerStats {
    pub fn inc(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_zero_and_accumulate() {
        let s = SourceStats::default();
        assert_eq!(s.data_bytes_sent(), 0);
        SourceStats::inc(&s.data_bytes_sent, 5);
        assert_eq!(s.data_bytes_sent(), 5);
    }
}
