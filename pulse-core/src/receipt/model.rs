use crate::event::{EnrichedEvent, EventIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 回执状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Delivered,
    Failed,
    RetryScheduled,
    DeadLetter,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::RetryScheduled => "retry_scheduled",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// 终态：delivered / dead_letter
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLetter)
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态迁移记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub status: ReceiptStatus,
    pub at: DateTime<Utc>,
}

/// 投递回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub(crate) token: String,
    pub(crate) subscriber_id: String,
    pub(crate) event_id: EventIdentity,
    pub(crate) channel: String,
    pub(crate) status: ReceiptStatus,
    pub(crate) attempts: u32,
    pub(crate) issued_at: DateTime<Utc>,
    pub(crate) acked_at: Option<DateTime<Utc>>,
    pub(crate) last_failure_reason: Option<String>,
    pub(crate) transitions: Vec<Transition>,
}

impl DeliveryReceipt {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn event_id(&self) -> &EventIdentity {
        &self.event_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    /// 已发起的投递次数（≥ 1）
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn acked_at(&self) -> Option<DateTime<Utc>> {
        self.acked_at
    }

    pub fn last_failure_reason(&self) -> Option<&str> {
        self.last_failure_reason.as_deref()
    }

    /// 按时间顺序的状态迁移（首条为 pending）
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// 最近一次状态变化的时间
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(self.issued_at)
    }

    pub(crate) fn transition(&mut self, status: ReceiptStatus, at: DateTime<Utc>) {
        self.status = status;
        self.transitions.push(Transition { status, at });
    }
}

/// 重试队列项：排空前由回执追踪器独占
#[derive(Debug, Clone)]
pub struct RetryQueueItem {
    pub token: String,
    pub event: Arc<EnrichedEvent>,
    pub subscriber_id: String,
    pub channel: String,
    /// 本次重试对应的投递序号
    pub attempt: u32,
    pub next_retry_at: DateTime<Utc>,
}
