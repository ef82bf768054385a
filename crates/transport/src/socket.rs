//! Socket traits - loop-facing transport interface
//!
//! The ingest loop reads from a `FrameSource`, each egress loop writes to a
//! `FrameSink`, and the controller builds both through a `Transport`.

use std::future::Future;

use bytes::Bytes;
use contracts::{OutputConfig, UpstreamConfig};

use crate::error::Result;

/// Upstream socket: yields one multi-part message per `recv`
#[trait_variant::make(FrameSource: Send)]
pub trait LocalFrameSource {
    /// Endpoint this socket is connected to (used for logging)
    fn endpoint(&self) -> &str;

    /// Receive the next multi-part message
    ///
    /// # Errors
    /// `TransportError::Closed` once the socket can never deliver again
    async fn recv(&mut self) -> Result<Vec<Bytes>>;

    /// Close the socket (idempotent)
    async fn close(&mut self);
}

/// Output socket: publishes one multi-part message per `send`
#[trait_variant::make(FrameSink: Send)]
pub trait LocalFrameSink {
    /// Endpoint this socket is bound to (used for logging)
    fn endpoint(&self) -> &str;

    /// Send one multi-part message
    ///
    /// May wait on the transport's own flow control.
    async fn send(&mut self, parts: Vec<Bytes>) -> Result<()>;

    /// Close the socket (idempotent)
    async fn close(&mut self);
}

/// Socket factory trait
///
/// Abstracts socket construction so the controller runs unchanged over
/// ZeroMQ and over the in-memory transport used in tests.
pub trait Transport: Send + Sync + 'static {
    /// Upstream socket type
    type Source: FrameSource + 'static;

    /// Output socket type
    type Sink: FrameSink + 'static;

    /// Connect the upstream socket with the configured pattern
    fn connect_upstream(
        &self,
        upstream: &UpstreamConfig,
    ) -> impl Future<Output = Result<Self::Source>> + Send;

    /// Bind one output socket on its configured port and pattern
    fn bind_output(&self, output: &OutputConfig) -> impl Future<Output = Result<Self::Sink>> + Send;
}
