//! Control-surface types: request input, per-call outcome, state snapshot

use std::path::PathBuf;

use contracts::{RepeaterConfig, RunState};
use dispatcher::EgressSnapshot;
use ingestion::IngestSnapshot;
use serde::Serialize;

use crate::error::ControlError;

/// Where `configure` takes its configuration from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Already built configuration (re-validated before use)
    Inline(RepeaterConfig),
    /// TOML / JSON file
    File(PathBuf),
}

impl From<RepeaterConfig> for ConfigSource {
    fn from(config: RepeaterConfig) -> Self {
        Self::Inline(config)
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// Result of one control call plus the state it left behind
#[derive(Debug)]
pub struct ControlOutcome {
    pub state: RunState,
    pub result: Result<(), ControlError>,
}

impl ControlOutcome {
    pub(crate) fn new(state: RunState, result: Result<(), ControlError>) -> Self {
        Self { state, result }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ControlError> {
        self.result.as_ref().err()
    }

    /// Tagged report for an external control surface
    pub fn report(&self) -> ControlReport {
        match &self.result {
            Ok(()) => ControlReport {
                response: "success",
                state: self.state,
                error: None,
                error_kind: None,
            },
            Err(e) => ControlReport {
                response: "error",
                state: self.state,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
            },
        }
    }

    pub fn into_result(self) -> Result<RunState, ControlError> {
        self.result.map(|()| self.state)
    }
}

/// Serializable form of a `ControlOutcome`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReport {
    /// `"success"` or `"error"`
    pub response: &'static str,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

/// Counters of the current or last run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub ingest: Option<IngestSnapshot>,
    pub outputs: Vec<EgressSnapshot>,
}

/// State, last valid configuration and counters of the current or last run
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub state: RunState,
    pub config: Option<RepeaterConfig>,
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub stats: RunStats,
}
