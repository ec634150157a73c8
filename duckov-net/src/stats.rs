//! Session statistics

use duckov_protocol::KcpStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one session's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reliable_sent: u64,
    pub reliable_received: u64,
    pub unreliable_sent: u64,
    pub unreliable_received: u64,
    /// Last PING round trip, if any
    pub latency_ms: Option<u32>,
    pub kcp: KcpStats,
}

/// Lock-free counters updated by the session threads
#[derive(Debug, Default)]
pub(crate) struct Counters {
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reliable_sent: AtomicU64,
    reliable_received: AtomicU64,
    unreliable_sent: AtomicU64,
    unreliable_received: AtomicU64,
}

impl Counters {
    pub(crate) fn datagram_sent(&self, len: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn datagram_received(&self, len: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn message_sent(&self, reliable: bool) {
        let counter = if reliable {
            &self.reliable_sent
        } else {
            &self.unreliable_sent
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn message_received(&self, reliable: bool) {
        let counter = if reliable {
            &self.reliable_received
        } else {
            &self.unreliable_received
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, latency_ms: Option<u32>, kcp: KcpStats) -> SessionStats {
        SessionStats {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reliable_sent: self.reliable_sent.load(Ordering::Relaxed),
            reliable_received: self.reliable_received.load(Ordering::Relaxed),
            unreliable_sent: self.unreliable_sent.load(Ordering::Relaxed),
            unreliable_received: self.unreliable_received.load(Ordering::Relaxed),
            latency_ms,
            kcp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        counters.datagram_sent(100);
        counters.datagram_sent(20);
        counters.datagram_received(7);
        counters.message_sent(true);
        counters.message_received(false);

        let stats = counters.snapshot(Some(12), KcpStats::default());
        assert_eq!(stats.datagrams_sent, 2);
        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.reliable_sent, 1);
        assert_eq!(stats.unreliable_received, 1);
        assert_eq!(stats.latency_ms, Some(12));
    }
}
