use super::FilterEngine;
use crate::error::{PulseError, PulseResult};
use crate::event::EnrichedEvent;
use crate::eventing::EventSink;
use crate::receipt::{ReceiptTracker, RetryQueueItem};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, error};

/// 具体通道的传输层（socket、推送、邮件……），由外部实现
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(
        &self,
        subscriber_id: &str,
        channel: &str,
        event: &EnrichedEvent,
    ) -> PulseResult<()>;
}

/// 订阅者路由：把一个事件扇出到所有通过过滤的订阅者的每个通道
///
/// 每个 (订阅者, 事件, 通道) 签发一张回执，成功即确认，失败交给回执追踪器退避重试。
pub struct SubscriberRouter {
    filters: Arc<FilterEngine>,
    receipts: Arc<ReceiptTracker>,
    transport: Arc<dyn ChannelTransport>,
}

impl SubscriberRouter {
    pub fn new(
        filters: Arc<FilterEngine>,
        receipts: Arc<ReceiptTracker>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        Self {
            filters,
            receipts,
            transport,
        }
    }

    async fn attempt(
        &self,
        subscriber_id: &str,
        channel: &str,
        event: &Arc<EnrichedEvent>,
    ) -> bool {
        let token = self.receipts.issue_receipt(subscriber_id, event.id(), channel);

        match self.transport.send(subscriber_id, channel, event).await {
            Ok(()) => {
                self.receipts.acknowledge(&token);
                true
            }
            Err(err) => {
                debug!(
                    subscriber = subscriber_id,
                    channel,
                    error = %err,
                    "channel delivery failed"
                );
                if let Err(e) = self
                    .receipts
                    .record_failure(&token, event.clone(), &err.to_string())
                {
                    error!(token, error = %e, "failed to record delivery failure");
                }
                false
            }
        }
    }
}

#[async_trait]
impl EventSink for SubscriberRouter {
    async fn deliver(&self, event: &Arc<EnrichedEvent>) -> PulseResult<()> {
        let routes = self.filters.routes_for(event);
        let attempts = routes
            .iter()
            .flat_map(|(subscriber, channels)| {
                channels
                    .iter()
                    .map(move |channel| self.attempt(subscriber, channel, event))
            });

        let results = join_all(attempts).await;
        let failed = results.iter().filter(|ok| !**ok).count();
        if failed == 0 {
            Ok(())
        } else {
            Err(PulseError::sink(format!(
                "{failed} of {} channel deliveries failed for {}",
                results.len(),
                event.id()
            )))
        }
    }

    async fn redeliver(&self, item: &RetryQueueItem) -> PulseResult<()> {
        self.transport
            .send(&item.subscriber_id, &item.channel, &item.event)
            .await
    }
}
