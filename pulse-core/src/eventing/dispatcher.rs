//! 批派发器（DeliveryDispatcher）
//!
//! 批内每个事件各自作为一个任务投递到下游，全部任务运行结束后才汇总：
//! 单条投递被拒绝只计入失败数；任务 panic/取消属于并发机制本身的失败，
//! 以 `batch:error` 通知上报，不会中断聚合循环。
//!
use super::{EventSink, Notification, NotificationBus};
use crate::batching::{Batch, StatsRecorder};
use crate::clock::Clock;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// 单批派发结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub count: usize,
    pub delivered: usize,
    pub failed: usize,
    /// 未能正常结束的投递任务数
    pub aborted: usize,
}

pub struct DeliveryDispatcher {
    sink: Arc<dyn EventSink>,
    notifications: NotificationBus,
    stats: Arc<StatsRecorder>,
    clock: Arc<dyn Clock>,
    limit: Option<Arc<Semaphore>>,
}

impl DeliveryDispatcher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        notifications: NotificationBus,
        stats: Arc<StatsRecorder>,
        clock: Arc<dyn Clock>,
        concurrency: Option<usize>,
    ) -> Self {
        Self {
            sink,
            notifications,
            stats,
            clock,
            limit: concurrency.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// 并发投递整批事件，任务按批内优先级顺序发起
    pub async fn dispatch(&self, batch: Batch) -> DispatchReport {
        let mut report = DispatchReport {
            count: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for event in batch.events {
            let sink = self.sink.clone();
            let limit = self.limit.clone();
            tasks.spawn(async move {
                let _permit = match limit {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                let result = sink.deliver(&event).await;
                (event, result)
            });
        }

        let mut join_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((event, Err(err))) => {
                    report.failed += 1;
                    debug!(event = %event.id(), error = %err, "event delivery failed");
                }
                Err(err) => {
                    report.aborted += 1;
                    join_errors.push(err.to_string());
                }
            }
        }

        self.stats
            .record_dispatch_failures(report.failed + report.aborted);

        let timestamp = self.clock.now();
        if join_errors.is_empty() {
            self.notifications.publish(Notification::BatchProcessed {
                count: report.count,
                failed: report.failed,
                timestamp,
            });
        } else {
            let reason = join_errors.join("; ");
            warn!(count = report.count, aborted = report.aborted, %reason, "batch dispatch error");
            self.notifications.publish(Notification::BatchError {
                count: report.count,
                reason,
                timestamp,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::error::{PulseError, PulseResult};
    use crate::event::EnrichedEvent;
    use crate::eventing::NotificationKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::StreamExt;

    struct FlakySink;

    #[async_trait]
    impl EventSink for FlakySink {
        async fn deliver(&self, event: &Arc<EnrichedEvent>) -> PulseResult<()> {
            match event.actor() {
                "reject" => Err(PulseError::sink("rejected")),
                "panic" => panic!("sink contract violated"),
                _ => Ok(()),
            }
        }
    }

    fn batch(actors: &[&str]) -> Batch {
        let now = Utc::now();
        Batch {
            events: actors
                .iter()
                .map(|a| {
                    Arc::new(
                        EnrichedEvent::builder()
                            .id(format!("acme:push:{a}").as_str().into())
                            .kind("push")
                            .entity_key("acme")
                            .actor(*a)
                            .occurred_at(now)
                            .received_at(now)
                            .build(),
                    )
                })
                .collect(),
        }
    }

    fn dispatcher(bus: &NotificationBus, stats: Arc<StatsRecorder>) -> DeliveryDispatcher {
        DeliveryDispatcher::new(
            Arc::new(FlakySink),
            bus.clone(),
            stats,
            Arc::new(SystemClock),
            Some(2),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_failure_does_not_abort_the_batch() {
        let bus = NotificationBus::new(16);
        let mut processed = bus.subscribe_to(&[NotificationKind::BatchProcessed]);
        let stats = Arc::new(StatsRecorder::default());

        let report = dispatcher(&bus, stats.clone())
            .dispatch(batch(&["a", "reject", "b", "c"]))
            .await;

        assert_eq!(report.count, 4);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(stats.snapshot(0).dispatch_failures, 1);
        match processed.next().await {
            Some(Notification::BatchProcessed { count, failed, .. }) => {
                assert_eq!((count, failed), (4, 1));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_sink_surfaces_batch_error() {
        let bus = NotificationBus::new(16);
        let mut errors = bus.subscribe_to(&[NotificationKind::BatchError]);

        let report = dispatcher(&bus, Arc::default())
            .dispatch(batch(&["a", "panic", "b"]))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.aborted, 1);
        assert!(matches!(
            errors.next().await,
            Some(Notification::BatchError { count: 3, .. })
        ));
    }
}
