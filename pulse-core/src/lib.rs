//! 活动事件聚合与可靠投递核心（pulse-core）
//!
//! 接收高频的外部活动事件（如 webhook 通知），完成：
//! - 准入限流（`ingest::AdmissionController`）与去重（`ingest::Deduplicator`）；
//! - 优先级与热度评分（`ingest::Enricher`）；
//! - 按综合优先级组批（`batching`）并并发派发到下游（`eventing::DeliveryDispatcher`）；
//! - 按订阅者过滤（`subscription::FilterEngine`）与通道扇出（`subscription::SubscriberRouter`）；
//! - 投递回执状态机、指数退避重试与死信（`receipt::ReceiptTracker`）；
//! - 周期清理（`janitor`）。
//!
//! 全部状态保存在进程内、由单个 `Aggregator` 实例持有，语义为进程生命周期内的“至少一次”投递。
//! 持久化、HTTP 路由、上游事件源与具体的通知通道均由外部实现。
//!
//! 典型用法：
//! 1. 实现 `ChannelTransport`（或直接实现 `EventSink`）；
//! 2. 通过 `Aggregator::builder()` 构建聚合器并 `start()`；
//! 3. 上游调用 `add_event` 送入事件，订阅者通过 `set_user_filter` 配置过滤；
//! 4. 关闭时调用 `stop()`，停止周期任务并排空待处理队列。
//!
pub mod aggregator;
pub mod batching;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod eventing;
pub mod ingest;
pub mod janitor;
pub mod receipt;
pub mod subscription;

pub use aggregator::{Aggregator, RetryReport};
pub use config::AggregatorConfig;
pub use error::{PulseError, PulseResult};
