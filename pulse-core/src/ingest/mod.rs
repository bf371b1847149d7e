//! 接入阶段（ingest）
//!
//! 原始事件依次经过：
//! - `AdmissionController`：固定时间窗口限流，超限立即丢弃；
//! - `Deduplicator`：基于事件身份在 TTL 内去重，同时维护按实体的活跃度历史；
//! - `Enricher`：计算基础优先级、热度与综合优先级。
//!
pub mod admission;
pub mod dedup;
pub mod enricher;

pub use admission::AdmissionController;
pub use dedup::{Deduplicator, HistoryEntry};
pub use enricher::Enricher;
