//! RunState - repeater lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide run state of the repeater
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No configuration applied, or a run was stopped
    #[default]
    Stopped,
    /// Transient while a configuration is validated
    Configuring,
    /// Valid configuration held, loops not running
    Ready,
    /// Ingest and egress loops running
    Running,
    /// Configuration rejected or a loop failed
    Error,
}

impl RunState {
    /// Stable numeric code (used for the state gauge)
    pub fn code(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Configuring => 1,
            Self::Ready => 2,
            Self::Running => 3,
            Self::Error => 4,
        }
    }

    /// Name as shown to control-surface callers
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Error => "error",
        }
    }

    /// Whether `configure` is accepted in this state
    pub fn can_configure(self) -> bool {
        matches!(self, Self::Stopped | Self::Ready | Self::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_allowed_states() {
        assert!(RunState::Stopped.can_configure());
        assert!(RunState::Ready.can_configure());
        assert!(RunState::Error.can_configure());
        assert!(!RunState::Running.can_configure());
        assert!(!RunState::Configuring.can_configure());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&RunState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(RunState::Error.to_string(), "error");
    }
}
