//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the repeater.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Frame Model
//! - A frame is a multi-part message: part 0 is JSON metadata, part 1 the raw payload
//! - `seq` is the upstream `frame` counter, the only field the dispatch core routes on

mod config;
mod error;
mod frame;
mod shutdown;
mod state;

pub use config::*;
pub use error::*;
pub use frame::Frame;
pub use shutdown::ShutdownSignal;
pub use state::RunState;
