//! 投递回执（receipt）
//!
//! 每次向订阅者的某个通道投递都会签发一张回执，由 `ReceiptTracker` 独占管理：
//! `pending → delivered`，或 `pending → failed → retry_scheduled → … → dead_letter`，
//! 重试成功时 `retry_scheduled → delivered`。
//!
//! 退避完全基于时间、由外部周期性排空驱动，不为单个重试项创建定时器。
//!
pub mod model;
pub mod tracker;

pub use model::{DeliveryReceipt, ReceiptStatus, RetryQueueItem, Transition};
pub use tracker::{RetryPolicy, ReceiptTracker};
