//! Ingestion 错误类型

use thiserror::Error;
use transport::TransportError;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Metadata part is not a JSON object of the expected shape
    #[error("malformed metadata: {message}")]
    MalformedMetadata {
        /// 错误消息
        message: String,
    },

    /// A required metadata field is absent
    #[error("metadata field '{field}' missing")]
    MissingField {
        /// 字段名
        field: &'static str,
    },

    /// Frame tagged with a different detector
    #[error("unexpected source '{found}' (expected '{expected}')")]
    UnexpectedSource {
        /// 期望的 source
        expected: String,
        /// 实际的 source
        found: String,
    },

    /// Message has fewer than two parts
    #[error("message has {parts} part(s), expected metadata and payload")]
    MissingPayload {
        /// 实际的 part 数
        parts: usize,
    },

    /// Upstream socket failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl IngestionError {
    /// Short rejection reason (metric label)
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedMetadata { .. } => "malformed_metadata",
            Self::MissingField { .. } => "missing_field",
            Self::UnexpectedSource { .. } => "unexpected_source",
            Self::MissingPayload { .. } => "missing_payload",
            Self::Transport(_) => "transport",
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
