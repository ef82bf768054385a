//! # Ingestion
//!
//! Upstream side of the repeater.
//!
//! Responsibilities:
//! - Receive multi-part messages from the upstream socket
//! - Decode and check the metadata header (`frame`, `source`, `type`, `shape`)
//! - Evaluate every output's selection policy
//! - Offer selected frames to the per-output bounded queues
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{IngestLoop, OutputRoute};
//! use fanout::{BoundedLossyQueue, SelectionPolicy};
//!
//! let queue = Arc::new(BoundedLossyQueue::new(5000));
//! let routes = vec![OutputRoute::new("preview", SelectionPolicy::every_nth(10), queue.clone())];
//!
//! let ingest = IngestLoop::new(source, routes, "gigafrost", shutdown.clone());
//! tokio::spawn(ingest.run());
//! ```

mod error;
mod header;
mod metrics;
mod pipeline;

// Re-exports
pub use error::{IngestionError, Result};
pub use header::{decode_header, frame_from_parts, FrameHeader};
pub use metrics::{IngestMetrics, IngestSnapshot};
pub use pipeline::{IngestLoop, OutputRoute, DEFAULT_POLL_INTERVAL};
