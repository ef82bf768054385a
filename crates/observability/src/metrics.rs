//! Repeater 指标模块
//!
//! 指标名称与描述集中在此；ingest / egress loop 通过 `metrics` 宏直接上报，
//! 控制面状态通过这里的 helper 上报。

use contracts::RunState;
use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const FRAMES_RECEIVED: &str = "repstream_frames_received_total";
pub const FRAMES_REJECTED: &str = "repstream_frames_rejected_total";
pub const FRAMES_FORWARDED: &str = "repstream_frames_forwarded_total";
pub const QUEUE_DROPPED: &str = "repstream_queue_dropped_total";
pub const QUEUE_DEPTH: &str = "repstream_queue_depth";
pub const FRAMES_SENT: &str = "repstream_frames_sent_total";
pub const RUN_STATE: &str = "repstream_run_state";
pub const CONTROL_REQUESTS: &str = "repstream_control_requests_total";

/// 注册指标描述（Prometheus HELP 文本）
///
/// 在 recorder 安装之后调用一次。
pub fn describe_metrics() {
    describe_counter!(FRAMES_RECEIVED, "Upstream messages received");
    describe_counter!(
        FRAMES_REJECTED,
        "Upstream messages rejected, by reason (malformed_metadata, missing_field, ...)"
    );
    describe_counter!(FRAMES_FORWARDED, "Frames selected by an output's policy");
    describe_counter!(
        QUEUE_DROPPED,
        "Frames evicted from an output queue because the consumer fell behind"
    );
    describe_gauge!(QUEUE_DEPTH, "Frames waiting in an output queue");
    describe_counter!(FRAMES_SENT, "Frames handed to an output socket, by status");
    describe_gauge!(
        RUN_STATE,
        "Controller state: 0=stopped 1=configuring 2=ready 3=running 4=error"
    );
    describe_counter!(CONTROL_REQUESTS, "Control operations, by operation and result");
}

/// 记录控制器状态
pub fn record_run_state(state: RunState) {
    gauge!(RUN_STATE).set(f64::from(state.code()));
}

/// 记录一次控制操作
pub fn record_control_request(operation: &'static str, success: bool) {
    let result = if success { "success" } else { "error" };
    counter!(CONTROL_REQUESTS, "operation" => operation, "result" => result).increment(1);
}
