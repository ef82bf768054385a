//! EgressHandle - a running egress loop and its shared counters

use std::sync::Arc;

use contracts::Frame;
use fanout::BoundedLossyQueue;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};
use transport::FrameSink;

use crate::egress::EgressLoop;
use crate::error::{DispatcherError, Result};
use crate::metrics::{EgressMetrics, EgressSnapshot};

/// Handle to a running egress task
pub struct EgressHandle {
    /// Output name
    name: String,
    /// Shared metrics
    metrics: Arc<EgressMetrics>,
    /// Queue the task drains
    queue: Arc<BoundedLossyQueue<Frame>>,
    /// Worker task handle
    worker_handle: JoinHandle<Result<()>>,
}

impl EgressHandle {
    /// Spawn the egress loop on the runtime
    ///
    /// `on_failure` runs inside the task if the loop ends with an error, before
    /// the task completes.
    pub fn spawn<K, F>(egress: EgressLoop<K>, on_failure: F) -> Self
    where
        K: FrameSink + 'static,
        F: FnOnce(&DispatcherError) + Send + 'static,
    {
        let name = egress.name().to_string();
        let metrics = Arc::clone(egress.metrics());
        let queue = Arc::clone(egress.queue());

        let worker_handle = tokio::spawn(async move {
            let result = egress.run().await;
            if let Err(e) = &result {
                on_failure(e);
            }
            result
        });

        Self {
            name,
            metrics,
            queue,
            worker_handle,
        }
    }

    /// Get output name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current metrics
    pub fn metrics(&self) -> &Arc<EgressMetrics> {
        &self.metrics
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.worker_handle.is_finished()
    }

    /// Counters of this output, including queue evictions
    pub fn snapshot(&self) -> EgressSnapshot {
        EgressSnapshot {
            output: self.name.clone(),
            queue_len: self.queue.len(),
            sent_count: self.metrics.sent_count(),
            failure_count: self.metrics.failure_count(),
            dropped_count: self.metrics.dropped_count(),
            evicted_count: self.queue.dropped_count(),
        }
    }

    /// Wait for the task to exit
    ///
    /// The caller sets the shutdown signal first; this only joins. Counters
    /// are read after the task has finished, so they are final.
    #[instrument(name = "egress_handle_join", skip(self), fields(output = %self.name))]
    pub async fn join(self) -> EgressExit {
        let result = match self.worker_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(output = %self.name, error = ?e, "Egress task panicked");
                Err(DispatcherError::TaskFailed {
                    name: self.name.clone(),
                    message: e.to_string(),
                })
            }
        };

        let snapshot = EgressSnapshot {
            output: self.name.clone(),
            queue_len: self.queue.len(),
            sent_count: self.metrics.sent_count(),
            failure_count: self.metrics.failure_count(),
            dropped_count: self.metrics.dropped_count(),
            evicted_count: self.queue.dropped_count(),
        };
        debug!(output = %self.name, sent = snapshot.sent_count, "EgressHandle join complete");
        EgressExit { snapshot, result }
    }
}

/// Final state of a joined egress task
#[derive(Debug)]
pub struct EgressExit {
    /// Final counters
    pub snapshot: EgressSnapshot,
    /// How the loop ended
    pub result: Result<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::bind_egress;
    use bytes::Bytes;
    use contracts::{OutputConfig, OutputPattern, PolicyConfig, ShutdownSignal};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use transport::{MemoryTransport, TransportError};

    /// Sink whose socket is already gone
    struct ClosedSink;

    impl FrameSink for ClosedSink {
        fn endpoint(&self) -> &str {
            "closed://"
        }

        async fn send(&mut self, _parts: Vec<Bytes>) -> std::result::Result<(), TransportError> {
            Err(TransportError::closed("closed://"))
        }

        async fn close(&mut self) {}
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Bytes::from_static(b"{}"), Bytes::from_static(b"p"))
    }

    #[tokio::test]
    async fn test_handle_snapshot_and_join() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9710);
        let queue = Arc::new(BoundedLossyQueue::new(2));
        let shutdown = ShutdownSignal::new();

        // overflow before the task starts draining
        for seq in 0..5 {
            queue.push(frame(seq));
        }

        let output = OutputConfig {
            name: "a".to_string(),
            port: 9710,
            pattern: OutputPattern::Pub,
            policy: PolicyConfig::EveryNth { n: 1 },
            queue_capacity: 2,
            writer: None,
        };
        let egress = bind_egress(&transport, &output, queue, shutdown.clone())
            .await
            .unwrap();
        let handle = EgressHandle::spawn(egress, |_| {});

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.output, "a");
        assert_eq!(snapshot.sent_count, 2);
        assert_eq!(snapshot.evicted_count, 3);
        assert_eq!(snapshot.queue_len, 0);

        shutdown.trigger();
        let exit = handle.join().await;
        assert!(exit.result.is_ok());
        assert_eq!(exit.snapshot.sent_count, 2);
    }

    #[tokio::test]
    async fn test_failure_hook_runs_on_closed_socket() {
        let queue = Arc::new(BoundedLossyQueue::new(4));
        queue.push(frame(0));

        let failed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed);
        let handle = EgressHandle::spawn(
            EgressLoop::new("dead", ClosedSink, queue, ShutdownSignal::new()),
            move |e| {
                assert_eq!(e.output(), "dead");
                flag.store(true, Ordering::SeqCst);
            },
        );

        let exit = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap();
        assert!(matches!(exit.result, Err(DispatcherError::Send { .. })));
        assert_eq!(exit.snapshot.sent_count, 0);
        assert!(failed.load(Ordering::SeqCst));
    }
}
