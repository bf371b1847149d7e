use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pulse_core::clock::ManualClock;
use pulse_core::event::{EnrichedEvent, RawEvent};
use pulse_core::subscription::{AllowedKinds, ChannelTransport, UserFilter};
use pulse_core::{Aggregator, AggregatorConfig, PulseResult};
use std::sync::Arc;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn send(
        &self,
        subscriber_id: &str,
        channel: &str,
        event: &EnrichedEvent,
    ) -> PulseResult<()> {
        self.sent.lock().push((
            subscriber_id.to_string(),
            channel.to_string(),
            event.kind().to_string(),
        ));
        Ok(())
    }
}

fn setup(config: AggregatorConfig) -> (Aggregator, ManualClock, Arc<RecordingTransport>) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let agg = Aggregator::builder()
        .config(config)
        .clock(Arc::new(clock.clone()))
        .transport(transport.clone())
        .build()
        .expect("valid config");
    (agg, clock, transport)
}

fn event(kind: &str, actor: &str) -> RawEvent {
    RawEvent::builder()
        .kind(kind)
        .entity_key("acme/widgets")
        .actor(actor)
        .occurred_at(Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap())
        .build()
}

#[tokio::test]
async fn admission_window_caps_accepted_events() {
    let (agg, clock, _) = setup(AggregatorConfig {
        window_ms: 1_000,
        max_events: 5,
        ..Default::default()
    });

    let mut accepted = 0;
    for i in 0..8 {
        if agg.add_event(event("push", &format!("dev-{i}"))).await {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 5);

    let stats = agg.statistics();
    assert_eq!(stats.rate_limited, 3);
    assert_eq!(stats.events_dropped, 3);

    // 窗口滑过后重新放行
    clock.advance_ms(1_001);
    assert!(agg.add_event(event("push", "late")).await);
}

#[tokio::test]
async fn identical_events_within_ttl_are_dropped() {
    let (agg, clock, _) = setup(AggregatorConfig {
        event_ttl_ms: 10_000,
        ..Default::default()
    });

    assert!(agg.add_event(event("push", "alice")).await);
    assert!(!agg.add_event(event("push", "alice")).await);
    assert!(agg.add_event(event("push", "bob")).await);

    clock.advance_ms(5_000);
    assert!(!agg.add_event(event("push", "alice")).await);

    clock.advance_ms(5_001);
    assert!(agg.add_event(event("push", "alice")).await);

    let stats = agg.statistics();
    assert_eq!(stats.duplicates, 2);
    assert_eq!(stats.events_dropped, 2);
    assert_eq!(stats.pending, 3);
}

#[tokio::test]
async fn low_priority_events_skip_subscribers_with_higher_threshold() {
    let (agg, _, transport) = setup(AggregatorConfig::default());
    agg.set_user_filter(
        "alice",
        UserFilter {
            min_priority: 2,
            ..Default::default()
        },
    );
    agg.set_user_filter(
        "bob",
        UserFilter {
            allowed_kinds: AllowedKinds::only(["StarEvent"]),
            channels: vec!["email".into()],
            ..Default::default()
        },
    );

    agg.add_event(event("star", "carol")).await;
    agg.add_event(event("push", "carol")).await;
    agg.flush().await;

    let mut sent = transport.sent.lock().clone();
    sent.sort();
    assert_eq!(
        sent,
        [
            (
                "alice".to_string(),
                "websocket".to_string(),
                "push".to_string()
            ),
            ("bob".to_string(), "email".to_string(), "star".to_string()),
        ]
    );

    let alice = agg.user_receipts("alice");
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].event_id().as_str().split(':').nth(1), Some("push"));
}

#[tokio::test]
async fn removed_filters_stop_routing() {
    let (agg, _, transport) = setup(AggregatorConfig::default());
    agg.set_user_filter("alice", UserFilter::default());
    assert_eq!(agg.subscribers(), ["alice"]);

    assert!(agg.remove_user_filter("alice").is_some());
    assert!(agg.subscribers().is_empty());

    agg.add_event(event("release", "carol")).await;
    agg.flush().await;
    assert!(transport.sent.lock().is_empty());
}
