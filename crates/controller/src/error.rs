//! Controller error types

use contracts::{ContractError, RunState};
use thiserror::Error;

/// Control operation errors
///
/// Every variant is returned inside a `ControlOutcome`; nothing escapes the
/// control boundary as a panic.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: RunState,
    },

    /// Configuration rejected
    #[error(transparent)]
    Configuration(#[from] ContractError),

    /// Socket construction failed during start
    #[error("start failed: {message}")]
    Start { message: String },

    /// A loop of the run failed
    #[error("loop failed: {message}")]
    LoopFailed { message: String },
}

impl ControlError {
    /// Create a lifecycle rejection
    pub fn lifecycle(operation: &'static str, state: RunState) -> Self {
        Self::Lifecycle { operation, state }
    }

    /// Error category (for reports and metrics)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lifecycle { .. } => "lifecycle",
            Self::Configuration(_) => "configuration",
            Self::Start { .. } => "start",
            Self::LoopFailed { .. } => "loop_failed",
        }
    }
}

/// Controller Result 类型别名
pub type Result<T> = std::result::Result<T, ControlError>;
