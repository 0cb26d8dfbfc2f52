//! # Traffic Statistics
//!
//! Counters of application data moved by a host and by each of its peers.
//! Acknowledgements and connection control traffic are not counted.
//! Both types serialize to JSON for export.

use serde::Serialize;

// ─── Host Stats ──────────────────────────────────────────────────────────────

/// Cumulative host counters. Each can be reset on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    /// Application payload bytes sent (retransmissions included).
    pub bytes_sent: u64,
    /// Application payload bytes received.
    pub bytes_received: u64,
    /// Datagrams carrying application data sent.
    pub packets_sent: u64,
    /// Datagrams carrying application data received.
    pub packets_received: u64,
}

impl HostStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
    }
}

// ─── Peer Stats ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Reliable sends that had to be retransmitted, once per retransmission.
    pub packets_lost: u64,
    /// Every retransmitted datagram, including disconnect retries.
    pub retransmissions: u64,
}

impl PeerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of sent datagrams that were lost (0.0-1.0).
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            (self.packets_lost as f64 / self.packets_sent as f64).min(1.0)
        }
    }
}
