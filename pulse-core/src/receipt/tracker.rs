use super::{DeliveryReceipt, ReceiptStatus, RetryQueueItem};
use crate::clock::Clock;
use crate::config::chrono_millis;
use crate::error::{PulseError, PulseResult};
use crate::event::{EnrichedEvent, EventIdentity};
use crate::eventing::{Notification, NotificationBus};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// 退避策略：第 n 次投递失败后延迟 `2^n * base`，n 达到上限即进入死信
///
/// 延迟不超过 `MAX_DURATION_MS`。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempts);
        chrono_millis(factor.saturating_mul(self.base_delay_ms))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5_000,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    receipts: HashMap<String, DeliveryReceipt>,
    /// 订阅者 -> 回执 token（按签发顺序）
    by_subscriber: HashMap<String, Vec<String>>,
    retry_queue: Vec<RetryQueueItem>,
}

impl TrackerState {
    fn unschedule(&mut self, token: &str) {
        self.retry_queue.retain(|item| item.token != token);
    }
}

/// 回执追踪器：签发回执、记录确认与失败、维护重试队列
///
/// 所有状态迁移都是同步的，不跨越 await。
pub struct ReceiptTracker {
    clock: Arc<dyn Clock>,
    notifications: NotificationBus,
    policy: RetryPolicy,
    receipts_per_subscriber: usize,
    state: Mutex<TrackerState>,
}

impl ReceiptTracker {
    pub fn new(
        clock: Arc<dyn Clock>,
        notifications: NotificationBus,
        policy: RetryPolicy,
        receipts_per_subscriber: usize,
    ) -> Self {
        Self {
            clock,
            notifications,
            policy,
            receipts_per_subscriber,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// 签发回执：状态 pending，attempts = 1
    pub fn issue_receipt(
        &self,
        subscriber_id: &str,
        event_id: &EventIdentity,
        channel: &str,
    ) -> String {
        let now = self.clock.now();
        let token = Uuid::new_v4().simple().to_string();
        let mut receipt = DeliveryReceipt {
            token: token.clone(),
            subscriber_id: subscriber_id.to_string(),
            event_id: event_id.clone(),
            channel: channel.to_string(),
            status: ReceiptStatus::Pending,
            attempts: 1,
            issued_at: now,
            acked_at: None,
            last_failure_reason: None,
            transitions: Vec::new(),
        };
        receipt.transition(ReceiptStatus::Pending, now);

        let mut s = self.state.lock();
        s.by_subscriber
            .entry(subscriber_id.to_string())
            .or_default()
            .push(token.clone());
        s.receipts.insert(token.clone(), receipt);
        token
    }

    /// 确认送达：pending | retry_scheduled → delivered；未知 token 或已处于终态返回 false
    pub fn acknowledge(&self, token: &str) -> bool {
        let now = self.clock.now();
        let acked = {
            let mut s = self.state.lock();
            let Some(receipt) = s.receipts.get_mut(token) else {
                return false;
            };
            if !matches!(
                receipt.status,
                ReceiptStatus::Pending | ReceiptStatus::RetryScheduled
            ) {
                return false;
            }
            receipt.acked_at = Some(now);
            receipt.transition(ReceiptStatus::Delivered, now);
            let acked = receipt.clone();
            s.unschedule(token);
            acked
        };

        debug!(token, subscriber = acked.subscriber_id(), "receipt acknowledged");
        self.notifications
            .publish(Notification::ReceiptAcked { receipt: acked });
        true
    }

    /// 记录一次投递失败
    ///
    /// attempts 已达上限时进入 dead_letter（终态）；否则按 `2^attempts * base` 计算延迟，
    /// 加入重试队列，attempts 加一，状态置为 retry_scheduled。返回迁移后的状态。
    pub fn record_failure(
        &self,
        token: &str,
        event: Arc<EnrichedEvent>,
        reason: &str,
    ) -> PulseResult<ReceiptStatus> {
        let now = self.clock.now();
        let notification = {
            let mut s = self.state.lock();
            let receipt = s
                .receipts
                .get_mut(token)
                .ok_or_else(|| PulseError::ReceiptNotFound {
                    token: token.to_string(),
                })?;
            if receipt.status.is_terminal() {
                return Err(PulseError::InvalidTransition {
                    token: token.to_string(),
                    from: receipt.status,
                    to: ReceiptStatus::Failed,
                });
            }

            receipt.last_failure_reason = Some(reason.to_string());
            receipt.transition(ReceiptStatus::Failed, now);

            if self.policy.exhausted(receipt.attempts) {
                receipt.transition(ReceiptStatus::DeadLetter, now);
                let dead = receipt.clone();
                s.unschedule(token);

                warn!(
                    token,
                    subscriber = dead.subscriber_id(),
                    channel = dead.channel(),
                    attempts = dead.attempts(),
                    reason,
                    "delivery dead-lettered"
                );
                Notification::ReceiptDeadLetter { receipt: dead }
            } else {
                let next_retry_at = now
                    .checked_add_signed(self.policy.delay_for(receipt.attempts))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                receipt.attempts += 1;
                receipt.transition(ReceiptStatus::RetryScheduled, now);
                let scheduled = receipt.clone();

                s.unschedule(token);
                s.retry_queue.push(RetryQueueItem {
                    token: token.to_string(),
                    event,
                    subscriber_id: scheduled.subscriber_id.clone(),
                    channel: scheduled.channel.clone(),
                    attempt: scheduled.attempts,
                    next_retry_at,
                });

                debug!(
                    token,
                    attempt = scheduled.attempts(),
                    %next_retry_at,
                    reason,
                    "delivery retry scheduled"
                );
                Notification::ReceiptRetryScheduled {
                    receipt: scheduled,
                    next_retry_at,
                }
            }
        };

        let status = match &notification {
            Notification::ReceiptDeadLetter { .. } => ReceiptStatus::DeadLetter,
            _ => ReceiptStatus::RetryScheduled,
        };
        self.notifications.publish(notification);
        Ok(status)
    }

    /// 取出并移除所有到期（`next_retry_at <= now`）的重试项，按到期时间排序
    ///
    /// 调用方负责重新投递，并根据结果再次调用 `acknowledge` / `record_failure`。
    pub fn drain_retry_queue(&self) -> Vec<RetryQueueItem> {
        let now = self.clock.now();
        let mut s = self.state.lock();
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut s.retry_queue)
            .into_iter()
            .partition(|item| item.next_retry_at <= now);
        s.retry_queue = rest;
        due.sort_by_key(|item| item.next_retry_at);
        due
    }

    /// 订阅者最近的回执（新到旧）
    pub fn user_receipts(&self, subscriber_id: &str) -> Vec<DeliveryReceipt> {
        let s = self.state.lock();
        let Some(tokens) = s.by_subscriber.get(subscriber_id) else {
            return Vec::new();
        };
        let mut receipts: Vec<DeliveryReceipt> = tokens
            .iter()
            .rev()
            .filter_map(|t| s.receipts.get(t).cloned())
            .collect();
        // 签发顺序已是时间顺序，这里再按时间稳定排序以应对外部时钟回拨
        receipts.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        receipts.truncate(self.receipts_per_subscriber);
        receipts
    }

    pub fn receipt(&self, token: &str) -> Option<DeliveryReceipt> {
        self.state.lock().receipts.get(token).cloned()
    }

    /// 重试队列按投递序号分组计数
    pub fn retry_stats(&self) -> BTreeMap<u32, usize> {
        let s = self.state.lock();
        let mut stats = BTreeMap::new();
        for item in &s.retry_queue {
            *stats.entry(item.attempt).or_insert(0) += 1;
        }
        stats
    }

    pub fn pending_retries(&self) -> usize {
        self.state.lock().retry_queue.len()
    }

    /// 清除最近一次状态变化早于 `cutoff` 的终态回执，返回清除条数
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut s = self.state.lock();
        let before = s.receipts.len();
        s.receipts
            .retain(|_, r| !(r.status.is_terminal() && r.updated_at() < cutoff));
        let removed = before - s.receipts.len();

        if removed > 0 {
            let TrackerState {
                receipts,
                by_subscriber,
                ..
            } = &mut *s;
            by_subscriber.retain(|_, tokens| {
                tokens.retain(|t| receipts.contains_key(t));
                !tokens.is_empty()
            });
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MAX_DURATION_MS;

    fn event() -> Arc<EnrichedEvent> {
        let now = Utc::now();
        Arc::new(
            EnrichedEvent::builder()
                .id("acme/api:push:alice:t0".into())
                .kind("push")
                .entity_key("acme/api")
                .actor("alice")
                .occurred_at(now)
                .received_at(now)
                .build(),
        )
    }

    fn tracker(clock: &ManualClock) -> ReceiptTracker {
        ReceiptTracker::new(
            Arc::new(clock.clone()),
            NotificationBus::new(64),
            RetryPolicy::default(),
            50,
        )
    }

    #[test]
    fn issue_then_acknowledge() {
        let clock = ManualClock::default();
        let t = tracker(&clock);
        let token = t.issue_receipt("u1", event().id(), "websocket");

        let r = t.receipt(&token).expect("receipt");
        assert_eq!(r.status(), ReceiptStatus::Pending);
        assert_eq!(r.attempts(), 1);

        assert!(t.acknowledge(&token));
        let r = t.receipt(&token).expect("receipt");
        assert_eq!(r.status(), ReceiptStatus::Delivered);
        assert!(r.acked_at().is_some());

        // 终态后不可再次确认
        assert!(!t.acknowledge(&token));
        assert!(!t.acknowledge("missing"));
    }

    #[test]
    fn backoff_is_capped_for_large_attempt_limits() {
        let clock = ManualClock::default();
        let policy = RetryPolicy {
            max_attempts: 64,
            base_delay_ms: 5_000,
        };
        assert_eq!(policy.delay_for(63), chrono_millis(MAX_DURATION_MS));

        let t = ReceiptTracker::new(Arc::new(clock.clone()), NotificationBus::new(4), policy, 50);
        let token = t.issue_receipt("u1", event().id(), "email");

        for _ in 1..64 {
            let status = t.record_failure(&token, event(), "timeout").expect("record");
            assert_eq!(status, ReceiptStatus::RetryScheduled);
        }
        assert_eq!(t.pending_retries(), 1);

        let status = t.record_failure(&token, event(), "timeout").expect("record");
        assert_eq!(status, ReceiptStatus::DeadLetter);
        assert_eq!(t.receipt(&token).map(|r| r.attempts()), Some(64));
        assert_eq!(t.pending_retries(), 0);
    }

    #[test]
    fn failure_schedules_exponential_backoff() {
        let clock = ManualClock::default();
        let t = tracker(&clock);
        let token = t.issue_receipt("u1", event().id(), "email");

        let status = t.record_failure(&token, event(), "timeout").expect("record");
        assert_eq!(status, ReceiptStatus::RetryScheduled);
        assert_eq!(t.retry_stats().get(&2), Some(&1));

        clock.advance_ms(9_999);
        assert!(t.drain_retry_queue().is_empty());
        clock.advance_ms(1);
        let due = t.drain_retry_queue();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt, 2);
        assert_eq!(due[0].channel, "email");
        assert_eq!(t.pending_retries(), 0);

        // 第 2 次失败后至少等待 20s
        t.record_failure(&token, event(), "timeout").expect("record");
        clock.advance_ms(19_999);
        assert!(t.drain_retry_queue().is_empty());
        clock.advance_ms(1);
        assert_eq!(t.drain_retry_queue().len(), 1);
    }

    #[test]
    fn retry_then_acknowledge_is_delivered() {
        let clock = ManualClock::default();
        let t = tracker(&clock);
        let token = t.issue_receipt("u1", event().id(), "push");
        t.record_failure(&token, event(), "503").expect("record");

        assert!(t.acknowledge(&token));
        assert_eq!(
            t.receipt(&token).map(|r| r.status()),
            Some(ReceiptStatus::Delivered)
        );
        // 确认后移出重试队列
        assert_eq!(t.pending_retries(), 0);
    }

    #[test]
    fn unknown_or_terminal_tokens_cannot_fail() {
        let clock = ManualClock::default();
        let t = tracker(&clock);
        assert!(matches!(
            t.record_failure("nope", event(), "x"),
            Err(PulseError::ReceiptNotFound { .. })
        ));

        let token = t.issue_receipt("u1", event().id(), "push");
        t.acknowledge(&token);
        assert!(matches!(
            t.record_failure(&token, event(), "x"),
            Err(PulseError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn user_receipts_are_newest_first_and_capped() {
        let clock = ManualClock::default();
        let t = ReceiptTracker::new(
            Arc::new(clock.clone()),
            NotificationBus::new(8),
            RetryPolicy::default(),
            3,
        );
        let mut tokens = Vec::new();
        for _ in 0..5 {
            tokens.push(t.issue_receipt("u1", event().id(), "push"));
            clock.advance_ms(10);
        }
        t.issue_receipt("u2", event().id(), "push");

        let receipts = t.user_receipts("u1");
        let got: Vec<&str> = receipts.iter().map(|r| r.token()).collect();
        assert_eq!(got, [tokens[4].as_str(), tokens[3].as_str(), tokens[2].as_str()]);
        assert!(t.user_receipts("nobody").is_empty());
    }

    #[test]
    fn purge_drops_only_old_terminal_receipts() {
        let clock = ManualClock::default();
        let t = tracker(&clock);
        let done = t.issue_receipt("u1", event().id(), "push");
        let open = t.issue_receipt("u1", event().id(), "push");
        t.acknowledge(&done);

        clock.advance_ms(60_000);
        let removed = t.purge_terminal_before(clock.now() - Duration::seconds(30));

        assert_eq!(removed, 1);
        assert!(t.receipt(&done).is_none());
        assert!(t.receipt(&open).is_some());
        assert_eq!(t.user_receipts("u1").len(), 1);
    }
}
