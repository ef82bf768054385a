//! # Fanout
//!
//! Leaf algorithms of the dispatch core.
//!
//! 负责：
//! - Per-output frame selection (`SelectionPolicy`)
//! - Bounded lossy queues between ingest and egress (`BoundedLossyQueue`)
//!
//! ## 使用示例
//!
//! ```ignore
//! use fanout::{BoundedLossyQueue, SelectionPolicy};
//! use std::time::{Duration, Instant};
//!
//! let mut policy = SelectionPolicy::stride(3);
//! let queue = BoundedLossyQueue::new(100);
//!
//! if policy.decide(frame.seq, Instant::now()) {
//!     queue.push(frame);
//! }
//! let next = queue.pop(Duration::from_millis(100)).await;
//! ```

mod policy;
mod queue;

pub use policy::SelectionPolicy;
pub use queue::{BoundedLossyQueue, QueueSnapshot};
