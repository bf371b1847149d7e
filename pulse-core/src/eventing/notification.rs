//! 运行通知（Notification）与内存广播总线
//!
//! 基于 `tokio::sync::broadcast`：
//! - `publish`：克隆并广播通知，无订阅者时忽略；
//! - `subscribe`：返回 `'static` 生命周期的通知流，便于在 `tokio::spawn` 中使用。
//!
use crate::error::{PulseError, PulseResult as Result};
use crate::receipt::DeliveryReceipt;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NotificationKind {
    BatchProcessed,
    BatchError,
    ReceiptAcked,
    ReceiptRetryScheduled,
    ReceiptDeadLetter,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 5] = [
        Self::BatchProcessed,
        Self::BatchError,
        Self::ReceiptAcked,
        Self::ReceiptRetryScheduled,
        Self::ReceiptDeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchProcessed => "batch:processed",
            Self::BatchError => "batch:error",
            Self::ReceiptAcked => "receipt:acked",
            Self::ReceiptRetryScheduled => "receipt:retry_scheduled",
            Self::ReceiptDeadLetter => "receipt:dead_letter",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行通知
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// 整批投递完成（含单条失败）
    BatchProcessed {
        count: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
    /// 批内并发机制本身失败（任务 panic 或被取消），不同于单条投递被拒绝
    BatchError {
        count: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ReceiptAcked {
        receipt: DeliveryReceipt,
    },
    ReceiptRetryScheduled {
        receipt: DeliveryReceipt,
        next_retry_at: DateTime<Utc>,
    },
    /// 重试耗尽，需要外部处理
    ReceiptDeadLetter {
        receipt: DeliveryReceipt,
    },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::BatchProcessed { .. } => NotificationKind::BatchProcessed,
            Self::BatchError { .. } => NotificationKind::BatchError,
            Self::ReceiptAcked { .. } => NotificationKind::ReceiptAcked,
            Self::ReceiptRetryScheduled { .. } => NotificationKind::ReceiptRetryScheduled,
            Self::ReceiptDeadLetter { .. } => NotificationKind::ReceiptDeadLetter,
        }
    }
}

/// 内存通知总线
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// `capacity` 为广播缓冲区容量，慢订阅者超出后会收到 lag 错误
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        // 无订阅者时 send 返回错误，视为非致命
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> BoxStream<'static, Result<Notification>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx)
            .map(|r| r.map_err(|e| PulseError::notification_lagged(e.to_string())));
        Box::pin(stream)
    }

    /// 仅订阅指定类型，丢弃 lag 错误
    pub fn subscribe_to(&self, kinds: &[NotificationKind]) -> BoxStream<'static, Notification> {
        let kinds = kinds.to_vec();
        let stream = self.subscribe().filter_map(move |r| {
            let keep = match r {
                Ok(n) if kinds.contains(&n.kind()) => Some(n),
                _ => None,
            };
            futures_util::future::ready(keep)
        });
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
