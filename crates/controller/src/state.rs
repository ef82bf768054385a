//! Run state cell
//!
//! The single process-wide `RunState`. Writes happen under the controller's
//! control lock or from a failing loop; reads never take the lock.

use std::sync::Arc;

use contracts::RunState;
use tokio::sync::watch;
use tracing::debug;

/// Shared, observable run state
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<RunState>>,
}

impl StateCell {
    /// Create a cell in `Stopped`
    pub fn new() -> Self {
        observability::record_run_state(RunState::Stopped);
        Self {
            tx: Arc::new(watch::Sender::new(RunState::Stopped)),
        }
    }

    /// Current state
    pub fn get(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Replace the state
    pub fn set(&self, state: RunState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Run state changed");
            observability::record_run_state(state);
        }
    }

    /// Move `Running` to `Error`; returns whether the transition happened
    pub fn fail_if_running(&self) -> bool {
        let failed = self.tx.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Error;
                true
            } else {
                false
            }
        });
        if failed {
            observability::record_run_state(RunState::Error);
        }
        failed
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
