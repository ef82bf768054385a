//! Dispatcher error types

use thiserror::Error;
use transport::TransportError;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Output socket could not be bound
    #[error("failed to bind output '{name}': {source}")]
    Bind {
        name: String,
        #[source]
        source: TransportError,
    },

    /// Output socket can no longer send
    #[error("output '{name}' send failed: {source}")]
    Send {
        name: String,
        #[source]
        source: TransportError,
    },

    /// Writer-mode metadata could not be rewritten
    #[error("output '{name}' metadata rewrite failed: {message}")]
    MetadataRewrite { name: String, message: String },

    /// Egress task panicked or was aborted
    #[error("egress task '{name}' failed: {message}")]
    TaskFailed { name: String, message: String },
}

impl DispatcherError {
    /// Create a metadata rewrite error
    pub fn metadata_rewrite(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetadataRewrite {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Output this error belongs to
    pub fn output(&self) -> &str {
        match self {
            Self::Bind { name, .. }
            | Self::Send { name, .. }
            | Self::MetadataRewrite { name, .. }
            | Self::TaskFailed { name, .. } => name,
        }
    }
}

/// Dispatcher Result 类型别名
pub type Result<T> = std::result::Result<T, DispatcherError>;
