//! Egress metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Metrics for a single output
#[derive(Debug, Default)]
pub struct EgressMetrics {
    /// Queue length after the last pop
    queue_len: AtomicUsize,
    /// Total successful sends
    sent_count: AtomicU64,
    /// Total send / rewrite failures
    failure_count: AtomicU64,
    /// Frames discarded by the egress loop (writer run complete)
    dropped_count: AtomicU64,
}

impl EgressMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current queue length
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Set current queue length
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get total send count
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    /// Increment send count
    pub fn inc_sent_count(&self) {
        self.sent_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Increment failure count
    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get dropped count
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Increment dropped count
    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of one output's counters (for reporting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressSnapshot {
    pub output: String,
    pub queue_len: usize,
    pub sent_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    /// Frames evicted from the queue by overflow
    pub evicted_count: u64,
}
