//! Bounded lossy queue between the ingest loop and one egress loop.
//!
//! A fixed-capacity `HeapRb` behind a short-held lock. When full, the oldest
//! item is evicted so slow consumers always see the freshest frames and the
//! producer never blocks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ringbuf::{traits::*, HeapRb};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// Single-producer / single-consumer ring with drop-oldest overflow
pub struct BoundedLossyQueue<T> {
    ring: Mutex<HeapRb<T>>,
    notify: Notify,
    capacity: usize,
    pushed_count: AtomicU64,
    dropped_count: AtomicU64,
    closed: AtomicBool,
}

impl<T> fmt::Debug for BoundedLossyQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedLossyQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

/// Snapshot of queue counters (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub len: usize,
    pub capacity: usize,
    pub pushed_count: u64,
    pub dropped_count: u64,
}

impl<T> BoundedLossyQueue<T> {
    /// Create a queue holding at most `capacity` items (`0` is treated as 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            notify: Notify::new(),
            capacity,
            pushed_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn ring(&self) -> MutexGuard<'_, HeapRb<T>> {
        // The ring holds no invariants a panicking holder could break
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, evicting the oldest one if the queue is full
    ///
    /// Returns the evicted item, if any. Never blocks on the consumer.
    #[inline]
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut ring = self.ring();
            let evicted = if ring.is_full() { ring.try_pop() } else { None };
            let _ = ring.try_push(item);
            evicted
        };

        self.pushed_count.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Remove the oldest item without waiting
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.ring().try_pop()
    }

    /// Remove the oldest item, waiting at most `wait` for one to arrive
    ///
    /// Returns `None` on timeout or once the queue is closed and drained.
    pub async fn pop(&self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Close the queue and wake a waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of queued items
    #[inline]
    pub fn len(&self) -> usize {
        self.ring().occupied_len()
    }

    /// Whether the queue is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring().is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted by overflow
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Items ever pushed
    pub fn pushed_count(&self) -> u64 {
        self.pushed_count.load(Ordering::Relaxed)
    }

    /// Counter snapshot
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            len: self.len(),
            capacity: self.capacity,
            pushed_count: self.pushed_count(),
            dropped_count: self.dropped_count(),
        }
    }
}
