//! # Transport
//!
//! Message-queue socket abstraction.
//!
//! Responsibilities:
//! - Define the `FrameSource` / `FrameSink` socket traits used by the loops
//! - Define the `Transport` factory the controller builds sockets from
//! - Provide a ZeroMQ implementation (SUB/PULL upstream, PUB/PUSH outputs)
//! - Provide an in-memory implementation for tests and demos
//!
//! ## Feature Flags
//!
//! - `zmq`: Enable the ZeroMQ transport (pure-Rust `zeromq` crate)

pub mod error;
pub mod memory;
pub mod socket;

#[cfg(feature = "zmq")]
pub mod zmq;

pub use error::{Result, TransportError};
pub use memory::{MemoryConfig, MemorySink, MemorySource, MemoryTransport};
pub use socket::{FrameSink, FrameSource, LocalFrameSink, LocalFrameSource, Transport};

#[cfg(feature = "zmq")]
pub use zmq::{ZmqSink, ZmqSource, ZmqTransport};
