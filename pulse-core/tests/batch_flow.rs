use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use pulse_core::clock::ManualClock;
use pulse_core::event::{EnrichedEvent, RawEvent};
use pulse_core::eventing::{EventSink, Notification, NotificationKind};
use pulse_core::{Aggregator, AggregatorConfig, PulseResult};
use std::sync::Arc;

#[derive(Default)]
struct CollectingSink {
    seen: Mutex<Vec<Arc<EnrichedEvent>>>,
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn deliver(&self, event: &Arc<EnrichedEvent>) -> PulseResult<()> {
        self.seen.lock().push(event.clone());
        Ok(())
    }
}

impl CollectingSink {
    fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

fn push_from(actor: usize) -> RawEvent {
    RawEvent::builder()
        .kind("push")
        .entity_key("acme/widgets")
        .actor(format!("dev-{actor}"))
        .occurred_at(Utc::now())
        .build()
}

fn aggregator(sink: Arc<CollectingSink>) -> Aggregator {
    Aggregator::builder()
        .config(AggregatorConfig::default())
        .clock(Arc::new(ManualClock::default()))
        .sink(sink)
        .build()
        .expect("valid config")
}

#[tokio::test]
async fn full_queue_dispatches_immediately_and_remainder_waits_for_tick() {
    let sink = Arc::new(CollectingSink::default());
    let agg = aggregator(sink.clone());
    let mut processed = agg.subscribe_to(&[NotificationKind::BatchProcessed]);

    for i in 0..60 {
        assert!(agg.add_event(push_from(i)).await);
    }

    // 第 50 个事件触发立即组批
    assert_eq!(sink.len(), 50);
    assert_eq!(agg.pending(), 10);
    match processed.next().await {
        Some(Notification::BatchProcessed { count, failed, .. }) => {
            assert_eq!(count, 50);
            assert_eq!(failed, 0);
        }
        other => panic!("unexpected notification: {other:?}"),
    }

    let report = agg.tick().await.expect("remaining batch");
    assert_eq!(report.count, 10);
    assert_eq!(sink.len(), 60);
    assert!(agg.tick().await.is_none());

    let stats = agg.statistics();
    assert_eq!(stats.total_processed, 60);
    assert_eq!(stats.batches_sent, 2);
    assert_eq!(stats.average_batch_size, 30.0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn higher_priority_kinds_are_batched_first() {
    let sink = Arc::new(CollectingSink::default());
    let agg = Aggregator::builder()
        .config(AggregatorConfig {
            max_batch_size: 100,
            ..Default::default()
        })
        .clock(Arc::new(ManualClock::default()))
        .sink(sink.clone())
        .build()
        .expect("valid config");

    let now = Utc::now();
    for (i, kind) in ["star", "push", "release", "fork", "pull_request"]
        .into_iter()
        .enumerate()
    {
        let raw = RawEvent::builder()
            .kind(kind)
            .entity_key(format!("repo-{i}"))
            .actor("alice")
            .occurred_at(now)
            .build();
        assert!(agg.add_event(raw).await);
    }
    assert_eq!(agg.flush().await, 5);

    let mut seen: Vec<(u8, String)> = sink
        .seen
        .lock()
        .iter()
        .map(|e| (e.priority_base(), e.kind().to_string()))
        .collect();
    seen.sort_by(|a, b| b.0.cmp(&a.0));
    assert_eq!(seen[0], (3, "release".to_string()));
    assert_eq!(seen.iter().filter(|(p, _)| *p == 2).count(), 2);
    assert_eq!(seen.iter().filter(|(p, _)| *p == 1).count(), 2);
}

#[tokio::test]
async fn flush_drains_every_pending_batch() {
    let sink = Arc::new(CollectingSink::default());
    let agg = Aggregator::builder()
        .config(AggregatorConfig {
            max_batch_size: 4,
            ..Default::default()
        })
        .clock(Arc::new(ManualClock::default()))
        .sink(sink.clone())
        .build()
        .expect("valid config");

    for i in 0..11 {
        agg.add_event(push_from(i)).await;
    }
    // 8 个已随两次立即组批送出，剩余 3 个
    assert_eq!(agg.pending(), 3);

    assert_eq!(agg.flush().await, 3);
    assert_eq!(agg.flush().await, 0);
    assert_eq!(sink.len(), 11);
    assert_eq!(agg.statistics().batches_sent, 3);
}

#[tokio::test]
async fn events_without_entity_or_kind_are_accepted_as_unknown() {
    let sink = Arc::new(CollectingSink::default());
    let agg = aggregator(sink.clone());

    assert!(agg.add_event(RawEvent::default()).await);
    agg.flush().await;

    let seen = sink.seen.lock();
    assert_eq!(seen[0].kind(), "unknown");
    assert_eq!(seen[0].entity_key(), "unknown");
    assert_eq!(seen[0].priority_base(), 0);
    assert_eq!(agg.statistics().malformed, 1);
}

#[test]
fn builder_requires_exactly_one_downstream() {
    let missing = Aggregator::builder().build();
    assert!(matches!(
        missing,
        Err(pulse_core::PulseError::InvalidConfig { .. })
    ));

    let zero_batch = Aggregator::builder()
        .config(AggregatorConfig {
            max_batch_size: 0,
            ..Default::default()
        })
        .sink(Arc::new(CollectingSink::default()))
        .build();
    assert!(zero_batch.is_err());
}
