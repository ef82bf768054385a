//! # Dispatcher
//!
//! 数据分发模块（egress 侧）。
//!
//! 负责：
//! - 每个 output 一个 egress loop，消费自己的 bounded queue
//! - Writer 模式下重写 metadata（frame / i_image / status ...）
//! - 发送失败只计数，不阻塞主链路

pub mod egress;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod writer;

pub use egress::{bind_egress, EgressLoop, DEFAULT_IDLE_INTERVAL, DEFAULT_POP_TIMEOUT};
pub use error::{DispatcherError, Result};
pub use handle::{EgressExit, EgressHandle};
pub use metrics::{EgressMetrics, EgressSnapshot};
pub use writer::{WriterStamp, STATUS_FINISHED, STATUS_WRITING};
