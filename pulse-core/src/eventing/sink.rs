//! 下游投递协议（EventSink）
//!
//! 由下游传输层（实时通道、推送、邮件等）实现。实现不得 panic，
//! 投递失败通过返回 `Err` 表达，由派发器与回执追踪器消费。
//!
use crate::{error::PulseResult as Result, event::EnrichedEvent, receipt::RetryQueueItem};
use async_trait::async_trait;
use std::sync::Arc;

/// 事件下游：负责把单个事件送达外部
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &Arc<EnrichedEvent>) -> Result<()>;

    /// 重投一次到期的重试项，默认等同于重新投递其事件
    async fn redeliver(&self, item: &RetryQueueItem) -> Result<()> {
        self.deliver(&item.event).await
    }
}
