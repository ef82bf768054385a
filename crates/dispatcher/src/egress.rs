//! Egress loop - drains one output queue into one output socket

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{Frame, OutputConfig, ShutdownSignal};
use fanout::BoundedLossyQueue;
use metrics::counter;
use tracing::{debug, info, instrument, warn};
use transport::{FrameSink, Transport, TransportError};

use crate::error::{DispatcherError, Result};
use crate::metrics::EgressMetrics;
use crate::writer::WriterStamp;

/// How long one pop waits for a frame before re-checking shutdown
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(50);

/// Sleep after an empty pop
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(5);

/// Egress loop for one output
pub struct EgressLoop<K> {
    name: String,
    sink: K,
    queue: Arc<BoundedLossyQueue<Frame>>,
    shutdown: ShutdownSignal,
    metrics: Arc<EgressMetrics>,
    writer: Option<WriterStamp>,
    pop_timeout: Duration,
    idle_interval: Duration,
}

impl<K: FrameSink> EgressLoop<K> {
    /// Create an egress loop over an already bound sink
    pub fn new(
        name: impl Into<String>,
        sink: K,
        queue: Arc<BoundedLossyQueue<Frame>>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            queue,
            shutdown,
            metrics: Arc::new(EgressMetrics::new()),
            writer: None,
            pop_timeout: DEFAULT_POP_TIMEOUT,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    /// Enable writer-mode metadata rewriting
    pub fn with_writer(mut self, writer: WriterStamp) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Override pop timeout and idle sleep
    pub fn with_timing(mut self, pop_timeout: Duration, idle_interval: Duration) -> Self {
        self.pop_timeout = pop_timeout;
        self.idle_interval = idle_interval;
        self
    }

    /// Output name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get metrics reference
    pub fn metrics(&self) -> &Arc<EgressMetrics> {
        &self.metrics
    }

    /// Consumer side of the queue
    pub fn queue(&self) -> &Arc<BoundedLossyQueue<Frame>> {
        &self.queue
    }

    /// Close the socket without running (start rollback)
    pub async fn close(mut self) {
        self.sink.close().await;
    }

    /// Run until shutdown or until the queue is closed
    ///
    /// Per-frame failures are counted and skipped. A frame that finds no
    /// attached peer is held and offered again until one attaches. Only a
    /// closed socket ends the loop early.
    #[instrument(
        name = "egress_loop",
        skip(self),
        fields(output = %self.name, endpoint = %self.sink.endpoint(), writer = self.writer.is_some())
    )]
    pub async fn run(mut self) -> Result<()> {
        info!("Egress loop started");

        let outcome = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }

            let Some(frame) = self.queue.pop(self.pop_timeout).await else {
                if self.queue.is_closed() {
                    break Ok(());
                }
                tokio::time::sleep(self.idle_interval).await;
                continue;
            };
            self.metrics.set_queue_len(self.queue.len());

            let seq = frame.seq;
            let frame = match self.writer.as_ref() {
                None => frame,
                Some(writer) => match writer.stamp(frame) {
                    Ok(Some(stamped)) => stamped,
                    Ok(None) => {
                        self.metrics.inc_dropped_count();
                        debug!(frame = seq, "Writer run complete, frame discarded");
                        continue;
                    }
                    Err(cause) => {
                        self.metrics.inc_failure_count();
                        let e = DispatcherError::metadata_rewrite(&self.name, cause.to_string());
                        warn!(frame = seq, error = %e, "Frame skipped");
                        continue;
                    }
                },
            };

            match self.deliver(frame.into_parts()).await {
                Ok(Delivery::Sent) => {
                    if let Some(writer) = self.writer.as_mut() {
                        writer.commit();
                    }
                    self.metrics.inc_sent_count();
                    counter!("repstream_frames_sent_total", "output" => self.name.clone(), "status" => "ok")
                        .increment(1);
                    debug!(frame = seq, forwarded = self.metrics.sent_count(), "Frame sent");
                }
                Ok(Delivery::Abandoned) => break Ok(()),
                Err(e) if e.is_fatal() => {
                    break Err(DispatcherError::Send {
                        name: self.name.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    self.metrics.inc_failure_count();
                    counter!("repstream_frames_sent_total", "output" => self.name.clone(), "status" => "error")
                        .increment(1);
                    warn!(frame = seq, error = %e, "Send failed");
                }
            }
        };

        self.sink.close().await;
        match &outcome {
            Ok(()) => info!(
                sent = self.metrics.sent_count(),
                failures = self.metrics.failure_count(),
                "Egress loop stopped"
            ),
            Err(e) => warn!(error = %e, "Egress loop failed"),
        }
        outcome
    }

    /// Send one message, waiting for a peer if none is attached
    async fn deliver(&mut self, parts: Vec<Bytes>) -> std::result::Result<Delivery, TransportError> {
        let mut waiting = false;
        loop {
            match self.sink.send(parts.clone()).await {
                Ok(()) => return Ok(Delivery::Sent),
                Err(e) if e.is_retryable() => {
                    if !waiting {
                        info!(error = %e, "Waiting for a peer to attach");
                        waiting = true;
                    }
                    if self.shutdown.is_triggered() || self.queue.is_closed() {
                        return Ok(Delivery::Abandoned);
                    }
                    tokio::time::sleep(self.idle_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// How a send attempt ended
enum Delivery {
    Sent,
    /// Stopped while waiting for a peer
    Abandoned,
}

/// Bind the output socket and build its egress loop
///
/// # Errors
/// `DispatcherError::Bind` if the socket cannot be bound.
pub async fn bind_egress<T: Transport>(
    transport: &T,
    output: &OutputConfig,
    queue: Arc<BoundedLossyQueue<Frame>>,
    shutdown: ShutdownSignal,
) -> Result<EgressLoop<T::Sink>> {
    let sink = transport
        .bind_output(output)
        .await
        .map_err(|source| DispatcherError::Bind {
            name: output.name.clone(),
            source,
        })?;

    let egress = EgressLoop::new(output.name.clone(), sink, queue, shutdown);
    Ok(match &output.writer {
        Some(writer) => egress.with_writer(WriterStamp::new(writer.clone())),
        None => egress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{OutputPattern, PolicyConfig, WriterConfig};
    use transport::{MemoryConfig, MemoryTransport};

    fn output(port: u16, writer: Option<WriterConfig>) -> OutputConfig {
        OutputConfig {
            name: format!("out-{port}"),
            port,
            pattern: OutputPattern::Push,
            policy: PolicyConfig::EveryNth { n: 1 },
            queue_capacity: 16,
            writer,
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(
            seq,
            Bytes::from(format!(r#"{{"frame": {seq}, "source": "gigafrost"}}"#)),
            Bytes::from_static(b"payload"),
        )
    }

    fn seq_of(parts: &[Bytes]) -> u64 {
        let meta: serde_json::Value = serde_json::from_slice(&parts[0]).unwrap();
        meta["frame"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_forwards_unchanged_and_stops() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9700);
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();

        let egress = bind_egress(&transport, &output(9700, None), queue.clone(), shutdown.clone())
            .await
            .unwrap();
        let metrics = Arc::clone(egress.metrics());
        let task = tokio::spawn(egress.run());

        for seq in [4, 8, 12] {
            queue.push(frame(seq));
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            let parts = rx.recv().await.unwrap();
            assert_eq!(parts[1].as_ref(), b"payload");
            received.push(seq_of(&parts));
        }
        assert_eq!(received, vec![4, 8, 12]);

        shutdown.trigger();
        task.await.unwrap().unwrap();
        assert_eq!(metrics.sent_count(), 3);
        // socket released on exit
        assert!(transport.bound_ports().is_empty());
    }

    #[tokio::test]
    async fn test_writer_mode_renumbers_and_discards() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9701);
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();
        let writer = WriterConfig {
            output_file: "/tmp/out.h5".to_string(),
            run_id: 7,
            detector_name: "gf".to_string(),
            n_images: 2,
        };

        let egress = bind_egress(&transport, &output(9701, Some(writer)), queue.clone(), shutdown.clone())
            .await
            .unwrap();
        let metrics = Arc::clone(egress.metrics());
        for seq in [100, 200, 300] {
            queue.push(frame(seq));
        }
        let task = tokio::spawn(egress.run());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(seq_of(&first), 0);
        assert_eq!(seq_of(&second), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.sent_count(), 2);
        assert_eq!(metrics.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_not_fatal() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            fail_send_ports: vec![9702],
            ..Default::default()
        });
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();

        let egress = bind_egress(&transport, &output(9702, None), queue.clone(), shutdown.clone())
            .await
            .unwrap();
        let metrics = Arc::clone(egress.metrics());
        queue.push(frame(0));
        queue.push(frame(1));
        let task = tokio::spawn(egress.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(metrics.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            fail_bind_ports: vec![9703],
            ..Default::default()
        });
        let result = bind_egress(
            &transport,
            &output(9703, None),
            Arc::new(BoundedLossyQueue::new(1)),
            ShutdownSignal::new(),
        )
        .await;
        assert!(matches!(result, Err(DispatcherError::Bind { ref name, .. }) if name == "out-9703"));
    }

    fn writer_config(n_images: u64) -> WriterConfig {
        WriterConfig {
            output_file: "/tmp/out.h5".to_string(),
            run_id: 3,
            detector_name: "gf".to_string(),
            n_images,
        }
    }

    fn status_of(parts: &[Bytes]) -> String {
        let meta: serde_json::Value = serde_json::from_slice(&parts[0]).unwrap();
        meta["status"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_failed_sends_keep_writer_slots() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            fail_send_ports: vec![9704],
            ..Default::default()
        });
        let rx = transport.output(9704);
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();

        let egress = bind_egress(&transport, &output(9704, Some(writer_config(2))), queue.clone(), shutdown.clone())
            .await
            .unwrap()
            .with_timing(Duration::from_millis(5), Duration::from_millis(1));
        let metrics = Arc::clone(egress.metrics());
        for seq in 0..4 {
            queue.push(frame(seq));
        }
        let task = tokio::spawn(egress.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.failure_count(), 4);
        assert_eq!(metrics.dropped_count(), 0);

        // once the writer accepts, the run starts at image 0
        transport.heal_sends(9704);
        for seq in 4..7 {
            queue.push(frame(seq));
        }
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((seq_of(&first), status_of(&first).as_str()), (0, "writing"));
        assert_eq!((seq_of(&second), status_of(&second).as_str()), (1, "finished"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        task.await.unwrap().unwrap();
        assert_eq!(metrics.sent_count(), 2);
        assert_eq!(metrics.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_frames_wait_for_peer() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            detached_ports: vec![9705],
            ..Default::default()
        });
        let rx = transport.output(9705);
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();

        let egress = bind_egress(&transport, &output(9705, None), queue.clone(), shutdown.clone())
            .await
            .unwrap()
            .with_timing(Duration::from_millis(5), Duration::from_millis(1));
        let metrics = Arc::clone(egress.metrics());
        for seq in [1, 2, 3] {
            queue.push(frame(seq));
        }
        let task = tokio::spawn(egress.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(metrics.sent_count(), 0);
        assert_eq!(metrics.failure_count(), 0);

        transport.attach_peer(9705);
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(seq_of(&rx.recv().await.unwrap()));
        }
        assert_eq!(received, vec![1, 2, 3]);

        shutdown.trigger();
        task.await.unwrap().unwrap();
        assert_eq!(metrics.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_peer() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            detached_ports: vec![9706],
            ..Default::default()
        });
        let queue = Arc::new(BoundedLossyQueue::new(16));
        let shutdown = ShutdownSignal::new();

        let egress = bind_egress(&transport, &output(9706, None), queue.clone(), shutdown.clone())
            .await
            .unwrap()
            .with_timing(Duration::from_millis(5), Duration::from_millis(1));
        queue.push(frame(0));
        let task = tokio::spawn(egress.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert!(transport.bound_ports().is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_ends_loop() {
        let transport = MemoryTransport::new();
        let queue = Arc::new(BoundedLossyQueue::new(16));

        // long pop timeout: only the close can end the wait in time
        let egress = bind_egress(&transport, &output(9707, None), queue.clone(), ShutdownSignal::new())
            .await
            .unwrap()
            .with_timing(Duration::from_secs(30), Duration::from_millis(1));
        let task = tokio::spawn(egress.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
