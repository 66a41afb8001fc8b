//! Per-session counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use camingest_types::{SessionStats, StreamKind};

/// Collects counters for one reader session.
#[derive(Debug)]
pub struct SessionMetrics {
    started_at: Instant,
    packets_read: AtomicU64,
    bytes_read: AtomicU64,
    video_dispatched: AtomicU64,
    audio_dispatched: AtomicU64,
    consumer_errors: AtomicU64,
    timestamps_repaired: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnects: AtomicU64,
}

impl SessionMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            video_dispatched: AtomicU64::new(0),
            audio_dispatched: AtomicU64::new(0),
            consumer_errors: AtomicU64::new(0),
            timestamps_repaired: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Record a packet read from the source.
    pub fn record_read(&self, bytes: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a packet handed to the consumer.
    pub fn record_dispatch(&self, kind: StreamKind) {
        let counter = match kind {
            StreamKind::Video => &self.video_dispatched,
            StreamKind::Audio => &self.audio_dispatched,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a consumer error.
    pub fn record_consumer_error(&self) {
        self.consumer_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timestamp repair.
    pub fn record_timestamp_repair(&self) {
        self.timestamps_repaired.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconnect attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counters.
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            video_dispatched: self.video_dispatched.load(Ordering::Relaxed),
            audio_dispatched: self.audio_dispatched.load(Ordering::Relaxed),
            consumer_errors: self.consumer_errors.load(Ordering::Relaxed),
            timestamps_repaired: self.timestamps_repaired.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = SessionMetrics::new();
        metrics.record_read(100);
        metrics.record_read(50);
        metrics.record_dispatch(StreamKind::Video);
        metrics.record_dispatch(StreamKind::Audio);
        metrics.record_dispatch(StreamKind::Audio);
        metrics.record_consumer_error();
        metrics.record_reconnect_attempt();
        metrics.record_reconnect_attempt();
        metrics.record_reconnect();

        let stats = metrics.snapshot();
        assert_eq!(stats.packets_read, 2);
        assert_eq!(stats.bytes_read, 150);
        assert_eq!(stats.video_dispatched, 1);
        assert_eq!(stats.audio_dispatched, 2);
        assert_eq!(stats.consumer_errors, 1);
        assert_eq!(stats.reconnect_attempts, 2);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.timestamps_repaired, 0);
    }
}
