//! Repeater - the run-state machine and its control operations

use contracts::{ContractError, RepeaterConfig, RunState, ShutdownSignal};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};
use transport::Transport;

use config_loader::ConfigLoader;

use crate::error::ControlError;
use crate::outcome::{ConfigSnapshot, ConfigSource, ControlOutcome, RunStats};
use crate::session::{LoopTiming, Session};
use crate::state::StateCell;

/// Everything guarded by the control lock
#[derive(Default)]
struct ControlState {
    /// Last valid configuration
    config: Option<RepeaterConfig>,
    last_error: Option<String>,
    session: Option<Session>,
    /// Counters of the last joined run
    last_run: RunStats,
}

/// Stream repeater controller
///
/// Control calls are serialized by an async lock; `state()` and
/// `subscribe()` never take it.
pub struct Repeater<T: Transport> {
    transport: T,
    state: StateCell,
    shutdown: ShutdownSignal,
    timing: LoopTiming,
    inner: Mutex<ControlState>,
}

impl<T: Transport> Repeater<T> {
    /// Create a controller in `Stopped`
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: StateCell::new(),
            shutdown: ShutdownSignal::new(),
            timing: LoopTiming::default(),
            inner: Mutex::new(ControlState::default()),
        }
    }

    /// Override loop timing (tests use short intervals)
    pub fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Watch run-state changes, including loop failures
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Current state, last valid configuration and run counters
    pub async fn config(&self) -> ConfigSnapshot {
        let inner = self.inner.lock().await;
        ConfigSnapshot {
            state: self.state.get(),
            config: inner.config.clone(),
            last_error: inner.last_error.clone(),
            stats: Self::stats_of(&inner),
        }
    }

    /// Counters of the running session, or of the last one
    pub async fn stats(&self) -> RunStats {
        let inner = self.inner.lock().await;
        Self::stats_of(&inner)
    }

    fn stats_of(inner: &ControlState) -> RunStats {
        match &inner.session {
            Some(session) => RunStats {
                ingest: Some(session.ingest_snapshot()),
                outputs: session.output_snapshots(),
            },
            None => inner.last_run.clone(),
        }
    }

    /// Validate and apply a configuration
    ///
    /// Accepted in `Stopped`, `Ready` and `Error`. A rejected configuration
    /// leaves the previous valid one in place and moves to `Error`.
    #[instrument(name = "repeater_configure", skip_all)]
    pub async fn configure(&self, source: impl Into<ConfigSource>) -> ControlOutcome {
        let source = source.into();
        let mut inner = self.inner.lock().await;
        self.reap(&mut inner).await;

        let current = self.state.get();
        if !current.can_configure() {
            return self.finish("configure", Err(ControlError::lifecycle("configure", current)));
        }

        self.state.set(RunState::Configuring);
        let loaded = match source {
            ConfigSource::Inline(config) => ConfigLoader::validate(&config).map(|()| config),
            ConfigSource::File(path) => ConfigLoader::load_from_path(&path),
        };

        let result = match loaded {
            Ok(config) => {
                info!(
                    upstream = %config.upstream.address,
                    outputs = config.outputs.len(),
                    "Configuration applied"
                );
                inner.config = Some(config);
                inner.last_error = None;
                self.state.set(RunState::Ready);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Configuration rejected");
                inner.last_error = Some(e.to_string());
                self.state.set(RunState::Error);
                Err(ControlError::from(e))
            }
        };
        self.finish("configure", result)
    }

    /// Build every socket and spawn every loop
    ///
    /// Only accepted in `Ready`. On a construction failure every socket
    /// built so far is closed and the state moves to `Error`.
    #[instrument(name = "repeater_start", skip_all)]
    pub async fn start(&self) -> ControlOutcome {
        let mut inner = self.inner.lock().await;
        self.reap(&mut inner).await;

        let current = self.state.get();
        if current != RunState::Ready {
            return self.finish("start", Err(ControlError::lifecycle("start", current)));
        }
        let Some(config) = inner.config.clone() else {
            // Ready always holds a configuration
            let e = ContractError::Other("no configuration applied".to_string());
            return self.finish("start", Err(ControlError::from(e)));
        };

        self.shutdown.reset();
        let launched = Session::launch(
            &self.transport,
            &config,
            &self.shutdown,
            &self.state,
            self.timing,
        )
        .await;

        let result = match launched {
            Ok(session) => {
                self.state.set(RunState::Running);
                // a loop may already have failed before Running was published
                if session.failure().is_some() {
                    self.state.fail_if_running();
                }
                inner.last_error = None;
                inner.session = Some(session);
                info!(outputs = config.outputs.len(), "Repeater running");
                Ok(())
            }
            Err(message) => {
                error!(error = %message, "Start failed, sockets released");
                self.shutdown.trigger();
                inner.last_error = Some(message.clone());
                self.state.set(RunState::Error);
                Err(ControlError::Start { message })
            }
        };
        self.finish("start", result)
    }

    /// Stop every loop and wait for them
    ///
    /// Only accepted in `Running`. After a stop a new `configure` is needed
    /// before the next `start`.
    #[instrument(name = "repeater_stop", skip_all)]
    pub async fn stop(&self) -> ControlOutcome {
        let mut inner = self.inner.lock().await;
        self.reap(&mut inner).await;

        let current = self.state.get();
        if current != RunState::Running {
            return self.finish("stop", Err(ControlError::lifecycle("stop", current)));
        }

        let errors = self.join_session(&mut inner).await;
        let result = match errors.into_iter().next() {
            None => {
                self.state.set(RunState::Stopped);
                info!("Repeater stopped");
                Ok(())
            }
            Some(message) => {
                inner.last_error = Some(message.clone());
                self.state.set(RunState::Error);
                Err(ControlError::LoopFailed { message })
            }
        };
        self.finish("stop", result)
    }

    /// Join a session whose loops failed on their own
    async fn reap(&self, inner: &mut ControlState) {
        if inner.session.is_none() || self.state.get() == RunState::Running {
            return;
        }
        let failure = inner
            .session
            .as_ref()
            .and_then(|session| session.failure().map(str::to_string));
        let errors = self.join_session(inner).await;
        if let Some(message) = failure.or_else(|| errors.into_iter().next()) {
            inner.last_error = Some(message);
        }
    }

    async fn join_session(&self, inner: &mut ControlState) -> Vec<String> {
        let Some(session) = inner.session.take() else {
            return Vec::new();
        };
        self.shutdown.trigger();
        let report = session.join().await;
        inner.last_run = RunStats {
            ingest: Some(report.ingest),
            outputs: report.outputs,
        };
        report.errors
    }

    fn finish(&self, operation: &'static str, result: Result<(), ControlError>) -> ControlOutcome {
        observability::record_control_request(operation, result.is_ok());
        if let Err(e) = &result {
            if matches!(e, ControlError::Lifecycle { .. }) {
                warn!(operation, error = %e, "Control request rejected");
            }
        }
        ControlOutcome::new(self.state.get(), result)
    }
}

impl<T: Transport> Drop for Repeater<T> {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
