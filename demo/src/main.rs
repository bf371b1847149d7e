//! 从标准输入读取 NDJSON 格式的活动事件，聚合后以日志形式“投递”给示例订阅者。
//!
//! ```text
//! cat events.ndjson | RUST_LOG=info cargo run -p demo
//! ```
//!
//! 订阅者过滤条件可通过 `PULSE_DEMO_FILTER` 以 JSON 给出，例如
//! `{"min_priority": 2, "allowed_kinds": ["push", "release"], "channels": ["websocket", "email"]}`。
//!
use anyhow::Context;
use async_trait::async_trait;
use pulse_core::event::{EnrichedEvent, RawEvent};
use pulse_core::eventing::{Interest, Notification, NotificationListener};
use pulse_core::subscription::{ChannelTransport, UserFilter};
use pulse_core::{Aggregator, AggregatorConfig, PulseResult};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_SUBSCRIBER: &str = "demo-user";

/// 把每次投递写入日志的传输层
struct LoggingTransport;

#[async_trait]
impl ChannelTransport for LoggingTransport {
    async fn send(
        &self,
        subscriber_id: &str,
        channel: &str,
        event: &EnrichedEvent,
    ) -> PulseResult<()> {
        info!(
            subscriber = subscriber_id,
            channel,
            kind = event.kind(),
            entity = event.entity_key(),
            actor = event.actor(),
            priority = format_args!("{:.3}", event.composite_priority()),
            "delivered"
        );
        Ok(())
    }
}

/// 把运行通知写入日志
struct NotificationLogger;

#[async_trait]
impl NotificationListener for NotificationLogger {
    fn listener_name(&self) -> &str {
        "notification-logger"
    }

    fn interest(&self) -> Interest {
        Interest::All
    }

    async fn on_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            kind = %notification.kind(),
            body = %serde_json::to_string(notification)?,
            "notification"
        );
        Ok(())
    }
}

fn demo_filter() -> anyhow::Result<UserFilter> {
    match std::env::var("PULSE_DEMO_FILTER") {
        Ok(raw) => serde_json::from_str(&raw).context("PULSE_DEMO_FILTER is not a valid filter"),
        Err(_) => Ok(UserFilter::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AggregatorConfig::from_env();
    let aggregator = Arc::new(
        Aggregator::builder()
            .config(config)
            .transport(Arc::new(LoggingTransport))
            .listeners(vec![Arc::new(NotificationLogger) as Arc<dyn NotificationListener>])
            .build()?,
    );
    aggregator.set_user_filter(DEMO_SUBSCRIBER, demo_filter()?);
    aggregator.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            next = lines.next_line() => {
                let Some(line) = next? else { break };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawEvent>(&line) {
                    Ok(raw) => {
                        if !aggregator.add_event(raw).await {
                            info!(line = line_no, "event dropped");
                        }
                    }
                    Err(err) => warn!(line = line_no, error = %err, "skipping unparsable line"),
                }
            }
        }
    }

    aggregator.stop().await;

    let stats = aggregator.statistics();
    info!(stats = %serde_json::to_string(&stats)?, "final statistics");
    for receipt in aggregator.user_receipts(DEMO_SUBSCRIBER).iter().take(5) {
        info!(
            token = receipt.token(),
            channel = receipt.channel(),
            status = %receipt.status(),
            "recent receipt"
        );
    }
    Ok(())
}
