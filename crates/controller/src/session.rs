//! One run of the repeater: the ingest task, every egress task and their counters

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use contracts::{Frame, RepeaterConfig, ShutdownSignal};
use dispatcher::{bind_egress, EgressHandle, EgressLoop, EgressSnapshot};
use fanout::{BoundedLossyQueue, SelectionPolicy};
use ingestion::{IngestLoop, IngestMetrics, IngestSnapshot, OutputRoute};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use transport::{FrameSink, Transport, TransportError};

use crate::state::StateCell;

/// Upper bound on building the upstream socket during `start`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Loop timing knobs
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// Upper bound on `connect_upstream`; expiry fails the start
    pub connect_timeout: Duration,
    /// Upper bound on one upstream receive
    pub poll_interval: Duration,
    /// Upper bound on one queue pop
    pub pop_timeout: Duration,
    /// Sleep after an empty pop
    pub idle_interval: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: ingestion::DEFAULT_POLL_INTERVAL,
            pop_timeout: dispatcher::DEFAULT_POP_TIMEOUT,
            idle_interval: dispatcher::DEFAULT_IDLE_INTERVAL,
        }
    }
}

/// Reaction to a loop ending with an error
///
/// The first message is kept; the state moves to `Error` (if still running)
/// and every other loop is told to stop.
#[derive(Clone)]
struct FailureReporter {
    state: StateCell,
    shutdown: ShutdownSignal,
    failure: Arc<OnceLock<String>>,
}

impl FailureReporter {
    fn report(&self, loop_name: &str, message: String) {
        let _ = self.failure.set(format!("{loop_name}: {message}"));
        if self.state.fail_if_running() {
            error!(task = loop_name, error = %message, "Loop failed, shutting down run");
        }
        self.shutdown.trigger();
    }
}

/// Outcome of joining a session
#[derive(Debug)]
pub(crate) struct SessionReport {
    pub errors: Vec<String>,
    pub ingest: IngestSnapshot,
    pub outputs: Vec<EgressSnapshot>,
}

/// Running loops of one `start`
pub(crate) struct Session {
    ingest: JoinHandle<ingestion::Result<()>>,
    ingest_metrics: Arc<IngestMetrics>,
    egress: Vec<EgressHandle>,
    queues: Vec<Arc<BoundedLossyQueue<Frame>>>,
    failure: Arc<OnceLock<String>>,
}

impl Session {
    /// Build every socket, then spawn every loop
    ///
    /// Output sockets are bound first and the upstream socket is connected
    /// last. If any step fails, every socket built so far is closed and no
    /// task has been spawned.
    pub async fn launch<T: Transport>(
        transport: &T,
        config: &RepeaterConfig,
        shutdown: &ShutdownSignal,
        state: &StateCell,
        timing: LoopTiming,
    ) -> Result<Self, String> {
        let mut routes = Vec::with_capacity(config.outputs.len());
        let mut egress_loops: Vec<EgressLoop<T::Sink>> = Vec::with_capacity(config.outputs.len());
        let mut queues = Vec::with_capacity(config.outputs.len());

        for output in &config.outputs {
            let queue: Arc<BoundedLossyQueue<Frame>> =
                Arc::new(BoundedLossyQueue::new(output.queue_capacity));
            match bind_egress(transport, output, Arc::clone(&queue), shutdown.clone()).await {
                Ok(egress) => {
                    egress_loops.push(egress.with_timing(timing.pop_timeout, timing.idle_interval));
                }
                Err(e) => {
                    close_all(egress_loops).await;
                    return Err(e.to_string());
                }
            }
            routes.push(OutputRoute::new(
                output.name.clone(),
                SelectionPolicy::from_config(&output.policy, config.block_size),
                Arc::clone(&queue),
            ));
            queues.push(queue);
        }

        let connect = tokio::time::timeout(
            timing.connect_timeout,
            transport.connect_upstream(&config.upstream),
        );
        let connected = match connect.await {
            Ok(connected) => connected,
            Err(_) => Err(TransportError::connect(
                &config.upstream.address,
                format!("timed out after {:?}", timing.connect_timeout),
            )),
        };
        let source = match connected {
            Ok(source) => source,
            Err(e) => {
                close_all(egress_loops).await;
                return Err(e.to_string());
            }
        };

        let reporter = FailureReporter {
            state: state.clone(),
            shutdown: shutdown.clone(),
            failure: Arc::new(OnceLock::new()),
        };

        let egress = egress_loops
            .into_iter()
            .map(|egress| {
                let reporter = reporter.clone();
                EgressHandle::spawn(egress, move |e| reporter.report(e.output(), e.to_string()))
            })
            .collect();

        let ingest_metrics = Arc::new(IngestMetrics::new());
        let ingest_loop = IngestLoop::new(
            source,
            routes,
            config.upstream.expected_source.clone(),
            shutdown.clone(),
        )
        .with_poll_interval(timing.poll_interval)
        .with_metrics(Arc::clone(&ingest_metrics));

        let ingest = {
            let reporter = reporter.clone();
            tokio::spawn(async move {
                let result = ingest_loop.run().await;
                if let Err(e) = &result {
                    reporter.report("ingest", e.to_string());
                }
                result
            })
        };

        info!(outputs = config.outputs.len(), "Run launched");
        Ok(Self {
            ingest,
            ingest_metrics,
            egress,
            queues,
            failure: reporter.failure,
        })
    }

    /// First loop failure of this run, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// Live counters
    pub fn ingest_snapshot(&self) -> IngestSnapshot {
        self.ingest_metrics.snapshot()
    }

    /// Live per-output counters
    pub fn output_snapshots(&self) -> Vec<EgressSnapshot> {
        self.egress.iter().map(EgressHandle::snapshot).collect()
    }

    /// Wait for every loop to exit
    ///
    /// The shutdown signal must already be set. Closing the queues wakes
    /// egress loops parked in a pop.
    pub async fn join(self) -> SessionReport {
        for queue in &self.queues {
            queue.close();
        }
        let mut errors = Vec::new();

        match self.ingest.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(format!("ingest: {e}")),
            Err(e) => errors.push(format!("ingest task failed: {e}")),
        }

        let mut outputs = Vec::with_capacity(self.egress.len());
        for handle in self.egress {
            let exit = handle.join().await;
            if let Err(e) = exit.result {
                errors.push(e.to_string());
            }
            outputs.push(exit.snapshot);
        }

        if !errors.is_empty() {
            warn!(errors = errors.len(), "Run ended with errors");
        }
        SessionReport {
            errors,
            ingest: self.ingest_metrics.snapshot(),
            outputs,
        }
    }
}

async fn close_all<K: FrameSink>(egress_loops: Vec<EgressLoop<K>>) {
    for egress in egress_loops {
        egress.close().await;
    }
}
