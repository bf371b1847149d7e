//! 聚合器（Aggregator）
//!
//! 串联“准入 → 去重 → 评分 → 待处理队列 → 组批 → 派发”的完整链路，
//! 并持有过滤引擎、回执追踪器与清理器。所有内存状态均为本实例的字段，
//! 由 `start()` 启动周期任务、`stop()` 显式关闭。
//!
use crate::batching::{BatchScheduler, Statistics, StatsRecorder};
use crate::clock::{Clock, SystemClock};
use crate::config::AggregatorConfig;
use crate::error::{PulseError, PulseResult};
use crate::event::{EnrichedEvent, EventIdentity, RawEvent};
use crate::eventing::engine::{ListenerRegistry, spawn_listener_loop, spawn_periodic};
use crate::eventing::{
    DeliveryDispatcher, DispatchReport, EngineHandle, EventSink, Notification, NotificationBus,
    NotificationKind, NotificationListener,
};
use crate::ingest::{AdmissionController, Deduplicator, Enricher};
use crate::janitor::{HistoryJanitor, SweepReport};
use crate::receipt::{DeliveryReceipt, ReceiptStatus, ReceiptTracker, RetryPolicy, RetryQueueItem};
use crate::subscription::{ChannelTransport, FilterEngine, SubscriberRouter, UserFilter};
use bon::bon;
use futures_core::stream::BoxStream;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

/// 一轮重试排空的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
}

pub struct Aggregator {
    config: AggregatorConfig,
    clock: Arc<dyn Clock>,
    admission: AdmissionController,
    dedup: Arc<Deduplicator>,
    enricher: Enricher,
    scheduler: BatchScheduler,
    dispatcher: DeliveryDispatcher,
    filters: Arc<FilterEngine>,
    receipts: Arc<ReceiptTracker>,
    janitor: HistoryJanitor,
    notifications: NotificationBus,
    stats: Arc<StatsRecorder>,
    listeners: Vec<Arc<dyn NotificationListener>>,
    engine: Mutex<Option<EngineHandle>>,
}

#[bon]
impl Aggregator {
    /// 构建聚合器
    ///
    /// 下游二选一：`transport` 使用内置的订阅者路由（过滤 + 回执 + 重试），
    /// `sink` 则直接把事件交给自定义下游。
    #[builder]
    pub fn new(
        #[builder(default)] config: AggregatorConfig,
        clock: Option<Arc<dyn Clock>>,
        transport: Option<Arc<dyn ChannelTransport>>,
        sink: Option<Arc<dyn EventSink>>,
        #[builder(default)] listeners: Vec<Arc<dyn NotificationListener>>,
    ) -> PulseResult<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let notifications = NotificationBus::new(config.notification_capacity);
        let stats = Arc::new(StatsRecorder::default());
        let filters = Arc::new(FilterEngine::new());
        let receipts = Arc::new(ReceiptTracker::new(
            clock.clone(),
            notifications.clone(),
            RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay_ms: config.retry_base_delay_ms,
            },
            config.receipts_per_subscriber,
        ));

        let sink: Arc<dyn EventSink> = match (transport, sink) {
            (Some(transport), None) => Arc::new(SubscriberRouter::new(
                filters.clone(),
                receipts.clone(),
                transport,
            )),
            (None, Some(sink)) => sink,
            _ => {
                return Err(PulseError::invalid_config(
                    "exactly one of `transport` or `sink` must be provided",
                ));
            }
        };

        let dedup = Arc::new(Deduplicator::new(config.event_ttl_ms));

        Ok(Self {
            admission: AdmissionController::new(clock.clone(), config.window_ms, config.max_events),
            enricher: Enricher::new(&config),
            scheduler: BatchScheduler::new(config.max_batch_size, stats.clone()),
            dispatcher: DeliveryDispatcher::new(
                sink,
                notifications.clone(),
                stats.clone(),
                clock.clone(),
                config.dispatch_concurrency,
            ),
            janitor: HistoryJanitor::new(
                clock.clone(),
                dedup.clone(),
                receipts.clone(),
                config.trending_window_ms,
                config.receipt_ttl_ms,
            ),
            dedup,
            filters,
            receipts,
            notifications,
            stats,
            listeners,
            clock,
            config,
            engine: Mutex::new(None),
        })
    }
}

impl Aggregator {
    // ========================================================================
    // 接入
    // ========================================================================

    /// 送入一个原始事件；通过限流与去重返回 true，被丢弃返回 false
    ///
    /// 待处理队列达到批大小时立即组批派发，不等待下一个周期。
    pub async fn add_event(&self, raw: RawEvent) -> bool {
        if !self.admission.admit() {
            self.stats.record_rate_limited();
            trace!("event rejected by admission control");
            return false;
        }

        let now = self.clock.now();
        let event = raw.normalize(now);
        let id = EventIdentity::of(&event);
        if !self.dedup.check_and_remember(&id, &event.entity_key, now) {
            self.stats.record_duplicate();
            return false;
        }
        if event.malformed {
            self.stats.record_malformed();
        }

        let recent = self
            .dedup
            .activity_since(&event.entity_key, self.enricher.trending_since(now));
        let enriched = Arc::new(self.enricher.enrich(event, id, now, recent));

        if self.scheduler.enqueue(enriched) {
            self.tick().await;
        }
        true
    }

    // ========================================================================
    // 组批与派发
    // ========================================================================

    /// 取一批派发；队列为空时不做任何事
    pub async fn tick(&self) -> Option<DispatchReport> {
        let batch = self.scheduler.next_batch()?;
        Some(self.dispatcher.dispatch(batch).await)
    }

    /// 反复 tick 直到队列为空，返回派发的事件数
    pub async fn flush(&self) -> usize {
        let mut flushed = 0;
        while let Some(report) = self.tick().await {
            flushed += report.count;
        }
        flushed
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    // ========================================================================
    // 运行控制
    // ========================================================================

    /// 启动批处理 tick、历史清理、重试排空与监听循环，需在 tokio 运行时内调用
    pub fn start(self: &Arc<Self>) -> PulseResult<()> {
        let mut slot = self.engine.lock();
        if slot.is_some() {
            return Err(PulseError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let mut handle = EngineHandle::new(token.clone());

        handle.push(self.spawn_worker(&token, self.config.batch_interval(), |agg| async move {
            agg.tick().await;
        }));
        handle.push(self.spawn_worker(&token, self.config.janitor_interval(), |agg| async move {
            agg.sweep();
        }));
        handle.push(self.spawn_worker(&token, self.config.retry_interval(), |agg| async move {
            agg.process_retries().await;
        }));

        let registry = ListenerRegistry::new(&self.listeners);
        if !registry.is_empty() {
            handle.push(spawn_listener_loop(
                token.clone(),
                &self.notifications,
                registry,
                self.config.listener_concurrency,
            ));
        }

        *slot = Some(handle);
        info!(
            batch_interval_ms = self.config.batch_interval_ms,
            max_batch_size = self.config.max_batch_size,
            listeners = self.listeners.len(),
            "aggregator started"
        );
        Ok(())
    }

    // 周期任务只持有弱引用，聚合器被释放后任务自行结束
    fn spawn_worker<F, Fut>(
        self: &Arc<Self>,
        token: &CancellationToken,
        interval: Duration,
        f: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        let stop = token.clone();
        spawn_periodic(token.clone(), interval, move || {
            let weak = weak.clone();
            let stop = stop.clone();
            let f = f.clone();
            async move {
                match weak.upgrade() {
                    Some(agg) => f(agg).await,
                    None => stop.cancel(),
                }
            }
        })
    }

    /// 停止周期任务并排空待处理队列，返回排空时派发的事件数
    ///
    /// 已发出的投递不会被取消；尚未到期的重试项不再执行。
    pub async fn stop(&self) -> usize {
        let handle = self.engine.lock().take();
        if let Some(handle) = handle {
            handle.shutdown();
            handle.join().await;
        }

        let flushed = self.flush().await;
        info!(
            flushed,
            abandoned_retries = self.receipts.pending_retries(),
            "aggregator stopped"
        );
        flushed
    }

    pub fn is_running(&self) -> bool {
        self.engine.lock().is_some()
    }

    /// 执行一次历史清理
    pub fn sweep(&self) -> SweepReport {
        self.janitor.sweep()
    }

    // ========================================================================
    // 过滤条件
    // ========================================================================

    pub fn set_user_filter(&self, subscriber_id: impl Into<String>, filter: UserFilter) {
        self.filters.set_user_filter(subscriber_id, filter);
    }

    pub fn user_filter(&self, subscriber_id: &str) -> Option<UserFilter> {
        self.filters.user_filter(subscriber_id)
    }

    pub fn remove_user_filter(&self, subscriber_id: &str) -> Option<UserFilter> {
        self.filters.remove_user_filter(subscriber_id)
    }

    pub fn passes_filter(&self, subscriber_id: &str, event: &EnrichedEvent) -> bool {
        self.filters.passes_filter(subscriber_id, event)
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.filters.subscribers()
    }

    // ========================================================================
    // 回执
    // ========================================================================

    pub fn issue_delivery_receipt(
        &self,
        subscriber_id: &str,
        event_id: &EventIdentity,
        channel: &str,
    ) -> String {
        self.receipts.issue_receipt(subscriber_id, event_id, channel)
    }

    pub fn acknowledge_receipt(&self, token: &str) -> bool {
        self.receipts.acknowledge(token)
    }

    pub fn record_delivery_failure(
        &self,
        token: &str,
        event: Arc<EnrichedEvent>,
        reason: &str,
    ) -> PulseResult<ReceiptStatus> {
        self.receipts.record_failure(token, event, reason)
    }

    pub fn drain_retry_queue(&self) -> Vec<RetryQueueItem> {
        self.receipts.drain_retry_queue()
    }

    /// 排空到期重试项并通过下游重新投递，再据结果确认或记录失败
    pub async fn process_retries(&self) -> RetryReport {
        let due = self.receipts.drain_retry_queue();
        let mut report = RetryReport {
            attempted: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return report;
        }

        let sink = self.dispatcher.sink().clone();
        let outcomes = join_all(due.iter().map(|item| sink.redeliver(item))).await;

        for (item, outcome) in due.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    if self.receipts.acknowledge(&item.token) {
                        report.delivered += 1;
                    }
                }
                Err(err) => {
                    match self
                        .receipts
                        .record_failure(&item.token, item.event.clone(), &err.to_string())
                    {
                        Ok(ReceiptStatus::DeadLetter) => report.dead_lettered += 1,
                        Ok(_) => report.rescheduled += 1,
                        Err(e) => warn!(token = %item.token, error = %e, "retry outcome dropped"),
                    }
                }
            }
        }
        report
    }

    /// 订阅者最近的回执（新到旧，最多 `receipts_per_subscriber` 条）
    pub fn user_receipts(&self, subscriber_id: &str) -> Vec<DeliveryReceipt> {
        self.receipts.user_receipts(subscriber_id)
    }

    pub fn receipt(&self, token: &str) -> Option<DeliveryReceipt> {
        self.receipts.receipt(token)
    }

    /// 重试队列按投递序号分组计数
    pub fn retry_stats(&self) -> BTreeMap<u32, usize> {
        self.receipts.retry_stats()
    }

    // ========================================================================
    // 观测
    // ========================================================================

    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot(self.scheduler.pending())
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    pub fn subscribe(&self) -> BoxStream<'static, PulseResult<Notification>> {
        self.notifications.subscribe()
    }

    pub fn subscribe_to(&self, kinds: &[NotificationKind]) -> BoxStream<'static, Notification> {
        self.notifications.subscribe_to(kinds)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }
}
