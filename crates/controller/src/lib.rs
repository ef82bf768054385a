//! # Controller
//!
//! Run-state machine of the repeater.
//!
//! 负责：
//! - 配置校验与应用 (`configure`)
//! - 构建 socket、启动 ingest / egress 任务 (`start`)
//! - 协作式停止并 join 所有任务 (`stop`)
//! - Loop failure → `Error`，由下一次控制调用回收
//!
//! ## 状态机
//!
//! ```text
//! Stopped ──configure──▶ Configuring ──ok──▶ Ready ──start──▶ Running
//!    ▲                        │                                  │
//!    │                        └──invalid──▶ Error ◀──loop fail───┤
//!    └──────────────────────────stop─────────────────────────────┘
//! ```
//!
//! ## 使用示例
//!
//! ```ignore
//! use controller::{ConfigSource, Repeater};
//! use transport::ZmqTransport;
//!
//! let repeater = Repeater::new(ZmqTransport::new());
//! repeater.configure(ConfigSource::File("repeater.toml".into())).await.into_result()?;
//! repeater.start().await.into_result()?;
//! // ...
//! repeater.stop().await.into_result()?;
//! ```

mod error;
mod outcome;
mod repeater;
mod session;
mod state;

pub use error::{ControlError, Result};
pub use outcome::{ConfigSnapshot, ConfigSource, ControlOutcome, ControlReport, RunStats};
pub use repeater::Repeater;
pub use session::{LoopTiming, DEFAULT_CONNECT_TIMEOUT};
pub use state::StateCell;
