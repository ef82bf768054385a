//! Transport error types

use contracts::ContractError;
use thiserror::Error;

/// Transport-specific error
#[derive(Debug, Error)]
pub enum TransportError {
    /// Output socket could not bind
    #[error("failed to bind '{endpoint}': {message}")]
    BindFailed { endpoint: String, message: String },

    /// Upstream socket could not connect
    #[error("failed to connect to '{endpoint}': {message}")]
    ConnectFailed { endpoint: String, message: String },

    /// Receive failed
    #[error("receive on '{endpoint}' failed: {message}")]
    RecvFailed { endpoint: String, message: String },

    /// Send failed
    #[error("send on '{endpoint}' failed: {message}")]
    SendFailed { endpoint: String, message: String },

    /// No peer attached yet; the message was not sent and may be retried
    #[error("no peer attached to '{endpoint}'")]
    NoPeers { endpoint: String },

    /// Socket closed by the peer or by `close()`
    #[error("socket '{endpoint}' closed")]
    Closed { endpoint: String },
}

impl TransportError {
    /// Create bind error
    pub fn bind(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BindFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create connect error
    pub fn connect(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create receive error
    pub fn recv(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecvFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create send error
    pub fn send(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create no-peers error
    pub fn no_peers(endpoint: impl Into<String>) -> Self {
        Self::NoPeers {
            endpoint: endpoint.into(),
        }
    }

    /// Create closed error
    pub fn closed(endpoint: impl Into<String>) -> Self {
        Self::Closed {
            endpoint: endpoint.into(),
        }
    }

    /// Whether the socket can never deliver again
    ///
    /// A connect failure surfacing after `connect_upstream` returned (a
    /// background connect that gave up) is fatal too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::ConnectFailed { .. })
    }

    /// Whether the same message should be sent again once a peer attaches
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoPeers { .. })
    }

    /// Endpoint the error occurred on
    pub fn endpoint(&self) -> &str {
        match self {
            Self::BindFailed { endpoint, .. }
            | Self::ConnectFailed { endpoint, .. }
            | Self::RecvFailed { endpoint, .. }
            | Self::SendFailed { endpoint, .. }
            | Self::NoPeers { endpoint }
            | Self::Closed { endpoint } => endpoint,
        }
    }
}

impl From<TransportError> for ContractError {
    fn from(err: TransportError) -> Self {
        ContractError::transport(err.endpoint().to_string(), err.to_string())
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, TransportError>;
