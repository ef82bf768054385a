//! Ingest loop metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingest loop counters
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Messages received from upstream
    pub frames_received: AtomicU64,

    /// Messages rejected (malformed / wrong source)
    pub frames_rejected: AtomicU64,

    /// Queue inserts across all outputs
    pub frames_offered: AtomicU64,

    /// Non-fatal receive errors
    pub recv_errors: AtomicU64,
}

impl IngestMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record message received
    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record message rejected
    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frame offered to an output queue
    pub fn record_offered(&self) {
        self.frames_offered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record receive error
    pub fn record_recv_error(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_offered: u64,
    pub recv_errors: u64,
}
