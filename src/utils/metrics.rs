//! Observability and Metrics
//!
//! Atomic counters describing what the actors created from one service have done.
//! A single [`TransportMetrics`] is shared (via `Arc`) by every actor built from the same
//! [`TransportConfig`](crate::config::TransportConfig).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

#[derive(Debug)]
pub struct TransportMetrics {
    /// Connect/listen attempts started
    pub connect_attempts: AtomicU64,
    /// Connections that reached the Connected state
    pub connections_established: AtomicU64,
    /// Attempts that failed for any reason
    pub connection_failures: AtomicU64,
    /// Attempts that failed during the TLS handshake
    pub handshake_failures: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub frames_received: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Receive streams that ended on a read or decode failure
    pub receive_faults: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub handshake_failures: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub receive_faults: u64,
    pub uptime_secs: u64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receive_faults: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn attempt_started(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_failed(&self, during_handshake: bool) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        if during_handshake {
            self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a frame written; `byte_count` includes the 4-byte header.
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame read; `byte_count` includes the 4-byte header.
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn receive_fault(&self) {
        self.receive_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            receive_faults: self.receive_faults.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Emit the current counters as a single info event.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            attempts = s.connect_attempts,
            established = s.connections_established,
            failures = s.connection_failures,
            handshake_failures = s.handshake_failures,
            frames_sent = s.frames_sent,
            frames_received = s.frames_received,
            receive_faults = s.receive_faults,
            uptime_secs = s.uptime_secs,
            "Transport metrics"
        );
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = TransportMetrics::new();
        metrics.attempt_started();
        metrics.attempt_started();
        metrics.attempt_failed(true);
        metrics.connection_established();
        metrics.frame_sent(10);
        metrics.frame_sent(6);
        metrics.frame_received(10);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connect_attempts, 2);
        assert_eq!(snapshot.connection_failures, 1);
        assert_eq!(snapshot.handshake_failures, 1);
        assert_eq!(snapshot.connections_established, 1);
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.bytes_sent, 16);
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.receive_faults, 0);
    }

    #[test]
    fn test_plain_failure_is_not_a_handshake_failure() {
        let metrics = TransportMetrics::new();
        metrics.attempt_failed(false);
        assert_eq!(metrics.snapshot().handshake_failures, 0);
        assert_eq!(metrics.snapshot().connection_failures, 1);
    }
}
