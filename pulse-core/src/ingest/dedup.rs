use crate::config::chrono_millis;
use crate::event::EventIdentity;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// 去重历史条目
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub entity_key: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct History {
    seen: HashMap<EventIdentity, HistoryEntry>,
    /// 按实体记录的接收时间（升序），供热度计算使用
    activity: HashMap<String, VecDeque<DateTime<Utc>>>,
}

/// 基于事件身份的去重器
///
/// 查找与写入均为哈希索引，摊还 O(1)。超过 TTL 但尚未被清理的条目视为不存在。
pub struct Deduplicator {
    ttl: Duration,
    history: Mutex<History>,
}

impl Deduplicator {
    pub fn new(event_ttl_ms: u64) -> Self {
        Self {
            ttl: chrono_millis(event_ttl_ms),
            history: Mutex::new(History::default()),
        }
    }

    /// 身份是否在 TTL 内出现过
    pub fn is_duplicate(&self, id: &EventIdentity, now: DateTime<Utc>) -> bool {
        let h = self.history.lock();
        h.seen
            .get(id)
            .is_some_and(|entry| now - entry.received_at <= self.ttl)
    }

    /// 记录身份与实体活跃度
    pub fn remember(&self, id: EventIdentity, entity_key: &str, received_at: DateTime<Utc>) {
        let mut h = self.history.lock();
        Self::record(&mut h, id, entity_key, received_at);
    }

    /// 检查并记录：新事件返回 true，重复事件返回 false
    pub fn check_and_remember(
        &self,
        id: &EventIdentity,
        entity_key: &str,
        received_at: DateTime<Utc>,
    ) -> bool {
        let mut h = self.history.lock();
        if let Some(entry) = h.seen.get(id) {
            if received_at - entry.received_at <= self.ttl {
                debug!(identity = %id, "duplicate event dropped");
                return false;
            }
        }
        Self::record(&mut h, id.clone(), entity_key, received_at);
        true
    }

    fn record(h: &mut History, id: EventIdentity, entity_key: &str, received_at: DateTime<Utc>) {
        h.seen.insert(
            id,
            HistoryEntry {
                entity_key: entity_key.to_string(),
                received_at,
            },
        );
        h.activity
            .entry(entity_key.to_string())
            .or_default()
            .push_back(received_at);
    }

    /// 实体在 `since` 之后（含）的事件数
    pub fn activity_since(&self, entity_key: &str, since: DateTime<Utc>) -> usize {
        let h = self.history.lock();
        h.activity
            .get(entity_key)
            .map(|times| times.iter().rev().take_while(|t| **t >= since).count())
            .unwrap_or(0)
    }

    /// 清除超过 TTL 的身份记录，返回清除条数
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut h = self.history.lock();
        let before = h.seen.len();
        h.seen
            .retain(|_, entry| now - entry.received_at <= self.ttl);
        before - h.seen.len()
    }

    /// 清除早于 `cutoff` 的活跃度样本，返回清除条数
    pub fn purge_activity_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut h = self.history.lock();
        let mut removed = 0;
        h.activity.retain(|_, times| {
            while times.front().is_some_and(|t| *t < cutoff) {
                times.pop_front();
                removed += 1;
            }
            !times.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.history.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &EventIdentity) -> Option<HistoryEntry> {
        self.history.lock().seen.get(id).cloned()
    }
}
