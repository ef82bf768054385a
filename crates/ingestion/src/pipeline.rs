//! Ingest loop main entry
//!
//! Receives upstream messages, decodes their header, asks every output's
//! selection policy for a decision and offers the frame to the matching queues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{Frame, ShutdownSignal};
use fanout::{BoundedLossyQueue, SelectionPolicy};
use metrics::{counter, gauge};
use tracing::{debug, info, instrument, trace, warn};
use transport::FrameSource;

use crate::error::{IngestionError, Result};
use crate::header::frame_from_parts;
use crate::metrics::IngestMetrics;

/// Upper bound on one blocking receive, so shutdown is observed while idle
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One output as seen by the ingest loop: its policy and the producer side of its queue
pub struct OutputRoute {
    name: String,
    policy: SelectionPolicy,
    queue: Arc<BoundedLossyQueue<Frame>>,
    forwarded: u64,
}

impl OutputRoute {
    pub fn new(
        name: impl Into<String>,
        policy: SelectionPolicy,
        queue: Arc<BoundedLossyQueue<Frame>>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            queue,
            forwarded: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames this route has offered to its queue
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn offer(&mut self, frame: &Frame, now: Instant) -> bool {
        if !self.policy.decide(frame.seq, now) {
            return false;
        }

        // Parts are ref-counted: this clone shares the payload buffer
        if self.queue.push(frame.clone()).is_some() {
            counter!("repstream_queue_dropped_total", "output" => self.name.clone()).increment(1);
            trace!(output = %self.name, "queue full, oldest frame evicted");
        }
        self.forwarded += 1;
        counter!("repstream_frames_forwarded_total", "output" => self.name.clone()).increment(1);
        gauge!("repstream_queue_depth", "output" => self.name.clone()).set(self.queue.len() as f64);
        true
    }
}

/// Ingest loop
///
/// Owns the upstream socket and every output's policy state. Runs until the
/// shared shutdown signal is observed or the upstream socket closes.
pub struct IngestLoop<S> {
    source: S,
    routes: Vec<OutputRoute>,
    expected_source: String,
    shutdown: ShutdownSignal,
    metrics: Arc<IngestMetrics>,
    poll_interval: Duration,
}

impl<S: FrameSource> IngestLoop<S> {
    /// Create ingest loop
    ///
    /// # Arguments
    /// * `source` - Connected upstream socket
    /// * `routes` - One route per output, in configuration order
    /// * `expected_source` - `source` tag accepted frames must carry
    /// * `shutdown` - Shared stop flag
    pub fn new(
        source: S,
        routes: Vec<OutputRoute>,
        expected_source: impl Into<String>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source,
            routes,
            expected_source: expected_source.into(),
            shutdown,
            metrics: Arc::new(IngestMetrics::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the receive poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Share an externally owned metrics instance
    pub fn with_metrics(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    /// Configured routes
    pub fn routes(&self) -> &[OutputRoute] {
        &self.routes
    }

    /// Handle one upstream message
    ///
    /// Returns the number of outputs the frame was offered to. A rejected
    /// message is counted and returned as an error; it never stops the loop.
    pub fn process_message(&mut self, parts: Vec<Bytes>, now: Instant) -> Result<usize> {
        self.metrics.record_received();
        counter!("repstream_frames_received_total").increment(1);

        let frame = match frame_from_parts(parts, &self.expected_source) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.record_rejected();
                counter!("repstream_frames_rejected_total", "reason" => e.reason()).increment(1);
                return Err(e);
            }
        };

        let mut offered = 0;
        for route in &mut self.routes {
            if route.offer(&frame, now) {
                offered += 1;
                self.metrics.record_offered();
            }
        }
        trace!(frame = frame.seq, offered, "frame dispatched");
        Ok(offered)
    }

    /// Run until shutdown
    ///
    /// # Errors
    /// Returns `IngestionError::Transport` if the upstream socket closes; the
    /// caller treats this as a failure of the whole run.
    #[instrument(
        name = "ingest_loop",
        skip(self),
        fields(endpoint = %self.source.endpoint(), outputs = self.routes.len())
    )]
    pub async fn run(mut self) -> Result<()> {
        info!("Ingest loop started");

        let outcome = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }

            let parts = match tokio::time::timeout(self.poll_interval, self.source.recv()).await {
                Err(_) => continue,
                Ok(Ok(parts)) => parts,
                Ok(Err(e)) if e.is_fatal() => break Err(IngestionError::Transport(e)),
                Ok(Err(e)) => {
                    self.metrics.record_recv_error();
                    warn!(error = %e, "Upstream receive failed");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if let Err(e) = self.process_message(parts, Instant::now()) {
                debug!(error = %e, reason = e.reason(), "Frame skipped");
            }
        };

        self.source.close().await;
        for route in &self.routes {
            debug!(output = %route.name, forwarded = route.forwarded, "Route totals");
        }

        let stats = self.metrics.snapshot();
        match &outcome {
            Ok(()) => info!(
                received = stats.frames_received,
                rejected = stats.frames_rejected,
                "Ingest loop stopped"
            ),
            Err(e) => warn!(error = %e, received = stats.frames_received, "Ingest loop failed"),
        }
        outcome
    }
}
