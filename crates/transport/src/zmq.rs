//! ZeroMQ transport
//!
//! Upstream sockets connect (SUB with an empty topic filter, or PULL);
//! output sockets bind on `tcp://0.0.0.0:<port>` (PUB or PUSH).
//!
//! The upstream connect runs in the background like a libzmq connect: the
//! detector may come up after the repeater, and `recv` waits until it does.
//! A connected upstream that stays silent for the reconnect interval is
//! rebuilt, since the socket never reports a vanished peer.

use std::time::Duration;

use bytes::Bytes;
use contracts::{OutputConfig, OutputPattern, UpstreamConfig, UpstreamPattern};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use zeromq::{
    Endpoint, PubSocket, PullSocket, PushSocket, Socket, SocketRecv, SocketSend, SubSocket,
    ZmqError, ZmqMessage,
};

use crate::error::{Result, TransportError};
use crate::socket::{FrameSink, FrameSource, Transport};

/// Silence on a connected upstream before the socket is rebuilt
pub const DEFAULT_RECONNECT_IDLE: Duration = Duration::from_secs(10);

/// Bind address for an output port
pub fn output_endpoint(port: u16) -> String {
    format!("tcp://0.0.0.0:{port}")
}

/// ZeroMQ socket factory
#[derive(Debug, Clone, Copy)]
pub struct ZmqTransport {
    reconnect_idle: Duration,
}

impl ZmqTransport {
    pub fn new() -> Self {
        Self {
            reconnect_idle: DEFAULT_RECONNECT_IDLE,
        }
    }

    /// Override the upstream reconnect interval
    pub fn with_reconnect_idle(mut self, reconnect_idle: Duration) -> Self {
        self.reconnect_idle = reconnect_idle;
        self
    }
}

impl Default for ZmqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ZmqTransport {
    type Source = ZmqSource;
    type Sink = ZmqSink;

    /// Returns as soon as the address is known to be valid
    #[instrument(name = "zmq_connect", skip(self, upstream), fields(address = %upstream.address))]
    async fn connect_upstream(&self, upstream: &UpstreamConfig) -> Result<ZmqSource> {
        let address = upstream.address.as_str();
        address
            .parse::<Endpoint>()
            .map_err(|e| TransportError::connect(address, e.to_string()))?;

        info!(pattern = %upstream.pattern, "Upstream connect scheduled");
        Ok(ZmqSource {
            endpoint: address.to_string(),
            pattern: upstream.pattern,
            reconnect_idle: self.reconnect_idle,
            last_activity: Instant::now(),
            state: Some(Inbound::connect(upstream.pattern, address)),
        })
    }

    #[instrument(name = "zmq_bind", skip(self, output), fields(output = %output.name, port = output.port))]
    async fn bind_output(&self, output: &OutputConfig) -> Result<ZmqSink> {
        let endpoint = output_endpoint(output.port);
        let bind_err = |e: ZmqError| TransportError::bind(&endpoint, e.to_string());

        let socket = match output.pattern {
            OutputPattern::Pub => {
                let mut socket = PubSocket::new();
                socket.bind(&endpoint).await.map_err(bind_err)?;
                OutboundSocket::Pub(socket)
            }
            OutputPattern::Push => {
                let mut socket = PushSocket::new();
                socket.bind(&endpoint).await.map_err(bind_err)?;
                OutboundSocket::Push(socket)
            }
        };

        info!(pattern = %output.pattern, "Output socket bound");
        Ok(ZmqSink {
            endpoint,
            socket: Some(socket),
        })
    }
}

enum InboundSocket {
    Sub(SubSocket),
    Pull(PullSocket),
}

impl InboundSocket {
    /// Connect and subscribe; waits until the peer accepts
    async fn open(pattern: UpstreamPattern, address: String) -> std::result::Result<Self, ZmqError> {
        match pattern {
            UpstreamPattern::Sub => {
                let mut socket = SubSocket::new();
                socket.connect(&address).await?;
                socket.subscribe("").await?;
                Ok(Self::Sub(socket))
            }
            UpstreamPattern::Pull => {
                let mut socket = PullSocket::new();
                socket.connect(&address).await?;
                Ok(Self::Pull(socket))
            }
        }
    }

    async fn recv(&mut self) -> std::result::Result<ZmqMessage, ZmqError> {
        match self {
            Self::Sub(socket) => socket.recv().await,
            Self::Pull(socket) => socket.recv().await,
        }
    }

    async fn close(self) -> Vec<ZmqError> {
        match self {
            Self::Sub(socket) => socket.close().await,
            Self::Pull(socket) => socket.close().await,
        }
    }
}

enum Inbound {
    Connecting(JoinHandle<std::result::Result<InboundSocket, ZmqError>>),
    Connected(InboundSocket),
}

impl Inbound {
    fn connect(pattern: UpstreamPattern, address: &str) -> Self {
        Self::Connecting(tokio::spawn(InboundSocket::open(pattern, address.to_string())))
    }
}

enum OutboundSocket {
    Pub(PubSocket),
    Push(PushSocket),
}

impl OutboundSocket {
    async fn send(&mut self, message: ZmqMessage) -> std::result::Result<(), ZmqError> {
        match self {
            Self::Pub(socket) => socket.send(message).await,
            Self::Push(socket) => socket.send(message).await,
        }
    }

    async fn close(self) -> Vec<ZmqError> {
        match self {
            Self::Pub(socket) => socket.close().await,
            Self::Push(socket) => socket.close().await,
        }
    }
}

/// Upstream socket, connecting or connected
pub struct ZmqSource {
    endpoint: String,
    pattern: UpstreamPattern,
    reconnect_idle: Duration,
    last_activity: Instant,
    state: Option<Inbound>,
}

impl ZmqSource {
    /// Whether the background connect has completed
    pub fn is_connected(&self) -> bool {
        matches!(self.state, Some(Inbound::Connected(_)))
    }

    /// Drop the current socket and schedule a fresh connect
    fn reconnect(&mut self) {
        let fresh = Inbound::connect(self.pattern, &self.endpoint);
        if let Some(Inbound::Connected(socket)) = self.state.replace(fresh) {
            let endpoint = self.endpoint.clone();
            tokio::spawn(async move {
                for err in socket.close().await {
                    debug!(endpoint = %endpoint, error = %err, "Error closing stale upstream socket");
                }
            });
        }
    }
}

impl FrameSource for ZmqSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recv(&mut self) -> Result<Vec<Bytes>> {
        loop {
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| TransportError::closed(&self.endpoint))?;

            match state {
                Inbound::Connecting(task) => {
                    let opened = match task.await {
                        Ok(opened) => opened.map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    match opened {
                        Ok(socket) => {
                            info!(endpoint = %self.endpoint, "Upstream peer connected");
                            self.last_activity = Instant::now();
                            self.state = Some(Inbound::Connected(socket));
                        }
                        Err(message) => {
                            self.state = None;
                            return Err(TransportError::connect(&self.endpoint, message));
                        }
                    }
                }
                Inbound::Connected(socket) => {
                    let deadline = self.last_activity + self.reconnect_idle;
                    match timeout_at(deadline, socket.recv()).await {
                        Ok(Ok(message)) => {
                            self.last_activity = Instant::now();
                            return Ok(message.into_vec());
                        }
                        Ok(Err(e)) => return Err(TransportError::recv(&self.endpoint, e.to_string())),
                        Err(_) => {
                            warn!(
                                endpoint = %self.endpoint,
                                idle_ms = self.reconnect_idle.as_millis() as u64,
                                "Upstream silent, reconnecting"
                            );
                            self.reconnect();
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        match self.state.take() {
            Some(Inbound::Connecting(task)) => {
                task.abort();
                debug!(endpoint = %self.endpoint, "Pending upstream connect cancelled");
            }
            Some(Inbound::Connected(socket)) => {
                for err in socket.close().await {
                    warn!(endpoint = %self.endpoint, error = %err, "Error closing upstream socket");
                }
                debug!(endpoint = %self.endpoint, "Upstream socket closed");
            }
            None => {}
        }
    }
}

/// Bound output socket
pub struct ZmqSink {
    endpoint: String,
    socket: Option<OutboundSocket>,
}

impl FrameSink for ZmqSink {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// A PUSH socket with no connected peer hands the message back as
    /// `NoPeers` instead of dropping it.
    async fn send(&mut self, parts: Vec<Bytes>) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| TransportError::closed(&self.endpoint))?;

        let message = ZmqMessage::try_from(parts)
            .map_err(|e| TransportError::send(&self.endpoint, e.to_string()))?;

        match socket.send(message).await {
            Ok(()) => Ok(()),
            Err(ZmqError::ReturnToSender { .. }) => Err(TransportError::no_peers(&self.endpoint)),
            Err(e) => Err(TransportError::send(&self.endpoint, e.to_string())),
        }
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            for err in socket.close().await {
                warn!(endpoint = %self.endpoint, error = %err, "Error closing output socket");
            }
            debug!(endpoint = %self.endpoint, "Output socket closed");
        }
    }
}
