//! # Push Engine
//!
//! 推送分发模块：把写入的 submit 批次推送给长轮询的消费者。
//!
//! 负责：
//! - 维护每个消费者的 PushHandle（输入队列、执行状态、待响应请求、过期定时器）
//! - Submit 广播：共享引用入队，不拷贝数据
//! - Exec 分发：worker 池串行消费每个 handle 的队列，必要时从 WAL 补齐缺口
//! - 响应编码与发送：每个请求最多发送一次
//!
//! ## Concurrency
//!
//! A handle is drained by at most one worker at a time. The exec status
//! moves Idle -> Executing -> Closing -> Idle, and a broadcaster that lands
//! while the worker is Closing either wins the handle back or is seen by the
//! worker's re-check, so queued input is never stranded.

pub mod broadcast;
pub mod encoder;
pub mod error;
mod exec;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod mock;
pub mod registry;
pub mod timer;

pub use broadcast::BroadcastReport;
pub use contracts::{ExecEngine, PollRequest, PushConfig, RpcSender, SubmitPayload, WalReader};
pub use encoder::{MessageKind, PollResponse, RspHead, SendOutcome};
pub use error::PushError;
pub use handle::{ExecStatus, InputStatus, PushHandle};
pub use manager::{HandleStats, PushManager, PushManagerBuilder};
pub use metrics::{HandleMetrics, MetricsSnapshot};
pub use registry::{HandleId, HandleRegistry};
pub use timer::{TimerService, TimerSlot};
