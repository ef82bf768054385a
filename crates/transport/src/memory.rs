//! In-memory transport
//!
//! Channel-backed sockets for tests and demos, with injectable bind/connect/send
//! failures. One upstream channel is shared by every connection; each output
//! port has its own channel whose receiving end is handed out by
//! [`MemoryTransport::output`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use contracts::{OutputConfig, UpstreamConfig};
use tracing::{debug, instrument};

use crate::error::{Result, TransportError};
use crate::socket::{FrameSink, FrameSource, Transport};

type Message = Vec<Bytes>;

/// Memory transport 配置（可注入失败场景）
#[derive(Debug, Default, Clone)]
pub struct MemoryConfig {
    /// Upstream connect fails
    pub fail_connect: bool,
    /// Upstream connect never completes
    pub hang_connect: bool,
    /// Ports whose bind fails
    pub fail_bind_ports: Vec<u16>,
    /// Ports whose every send fails
    pub fail_send_ports: Vec<u16>,
    /// Ports with no attached peer until [`MemoryTransport::attach_peer`]
    pub detached_ports: Vec<u16>,
}

struct Inner {
    config: MemoryConfig,
    upstream_tx: Sender<Message>,
    upstream_rx: Receiver<Message>,
    outputs: Mutex<HashMap<u16, (Sender<Message>, Receiver<Message>)>>,
    bound: Mutex<HashSet<u16>>,
    detached: Mutex<HashSet<u16>>,
    failing: Mutex<HashSet<u16>>,
}

impl Inner {
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output_channel(&self, port: u16) -> (Sender<Message>, Receiver<Message>) {
        Self::lock(&self.outputs)
            .entry(port)
            .or_insert_with(async_channel::unbounded)
            .clone()
    }

    fn release(&self, port: u16) {
        Self::lock(&self.bound).remove(&port);
    }

    fn has_peer(&self, port: u16) -> bool {
        !Self::lock(&self.detached).contains(&port)
    }

    fn send_fails(&self, port: u16) -> bool {
        Self::lock(&self.failing).contains(&port)
    }
}

/// Channel-backed socket factory
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Create a transport without injected failures
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a transport with injected failures
    pub fn with_config(config: MemoryConfig) -> Self {
        let (upstream_tx, upstream_rx) = async_channel::unbounded();
        let detached = config.detached_ports.iter().copied().collect();
        let failing = config.fail_send_ports.iter().copied().collect();
        Self {
            inner: Arc::new(Inner {
                config,
                detached: Mutex::new(detached),
                failing: Mutex::new(failing),
                upstream_tx,
                upstream_rx,
                outputs: Mutex::new(HashMap::new()),
                bound: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Queue one upstream message for the connected source
    pub fn feed(&self, parts: Vec<Bytes>) -> Result<()> {
        self.inner
            .upstream_tx
            .try_send(parts)
            .map_err(|_| TransportError::closed("memory://upstream"))
    }

    /// Close the upstream channel; connected sources then report `Closed`
    pub fn close_upstream(&self) {
        self.inner.upstream_tx.close();
    }

    /// Receiving end of an output port (created on first use)
    pub fn output(&self, port: u16) -> Receiver<Message> {
        self.inner.output_channel(port).1
    }

    /// Attach a peer to a detached port; sends to it succeed from now on
    pub fn attach_peer(&self, port: u16) {
        Inner::lock(&self.inner.detached).remove(&port);
    }

    /// Stop injecting send failures on a port
    pub fn heal_sends(&self, port: u16) {
        Inner::lock(&self.inner.failing).remove(&port);
    }

    /// Ports currently bound by live sinks
    pub fn bound_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Inner::lock(&self.inner.bound).iter().copied().collect();
        ports.sort_unstable();
        ports
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    type Source = MemorySource;
    type Sink = MemorySink;

    #[instrument(name = "memory_connect", skip(self, upstream), fields(address = %upstream.address))]
    async fn connect_upstream(&self, upstream: &UpstreamConfig) -> Result<MemorySource> {
        if self.inner.config.fail_connect {
            return Err(TransportError::connect(
                &upstream.address,
                "injected connect failure",
            ));
        }
        if self.inner.config.hang_connect {
            std::future::pending::<()>().await;
        }
        Ok(MemorySource {
            endpoint: upstream.address.clone(),
            rx: Some(self.inner.upstream_rx.clone()),
        })
    }

    #[instrument(name = "memory_bind", skip(self, output), fields(output = %output.name, port = output.port))]
    async fn bind_output(&self, output: &OutputConfig) -> Result<MemorySink> {
        let endpoint = format!("memory://{}", output.port);
        if self.inner.config.fail_bind_ports.contains(&output.port) {
            return Err(TransportError::bind(endpoint, "injected bind failure"));
        }
        if !Inner::lock(&self.inner.bound).insert(output.port) {
            return Err(TransportError::bind(endpoint, "address already in use"));
        }

        let (tx, _) = self.inner.output_channel(output.port);
        Ok(MemorySink {
            endpoint,
            port: output.port,
            tx: Some(tx),
            inner: Arc::clone(&self.inner),
        })
    }
}

/// In-memory upstream socket
pub struct MemorySource {
    endpoint: String,
    rx: Option<Receiver<Message>>,
}

impl FrameSource for MemorySource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recv(&mut self) -> Result<Message> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| TransportError::closed(&self.endpoint))?;
        rx.recv()
            .await
            .map_err(|_| TransportError::closed(&self.endpoint))
    }

    async fn close(&mut self) {
        if self.rx.take().is_some() {
            debug!(endpoint = %self.endpoint, "Memory source closed");
        }
    }
}

/// In-memory output socket
pub struct MemorySink {
    endpoint: String,
    port: u16,
    tx: Option<Sender<Message>>,
    inner: Arc<Inner>,
}

impl FrameSink for MemorySink {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, parts: Message) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::closed(&self.endpoint))?;
        if self.inner.send_fails(self.port) {
            return Err(TransportError::send(&self.endpoint, "injected send failure"));
        }
        if !self.inner.has_peer(self.port) {
            return Err(TransportError::no_peers(&self.endpoint));
        }
        tx.send(parts)
            .await
            .map_err(|_| TransportError::closed(&self.endpoint))
    }

    async fn close(&mut self) {
        if self.tx.take().is_some() {
            self.inner.release(self.port);
            debug!(endpoint = %self.endpoint, "Memory sink closed");
        }
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.inner.release(self.port);
        }
    }
}
