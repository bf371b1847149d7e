use crate::config::{AggregatorConfig, PriorityTable, chrono_millis};
use crate::event::{EnrichedEvent, EventIdentity, NormalizedEvent};
use chrono::{DateTime, Duration, Utc};

const BASE_WEIGHT: f64 = 0.4;
const RECENCY_WEIGHT: f64 = 0.3;
const TRENDING_WEIGHT: f64 = 0.3;

/// 评分器：基础优先级查表、热度与综合优先级
///
/// 评分只影响批内排序，不影响准入。
#[derive(Debug, Clone)]
pub struct Enricher {
    priorities: PriorityTable,
    trending_window: Duration,
    trending_saturation: usize,
    recency_horizon: Duration,
}

impl Enricher {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            priorities: config.priority_table.clone(),
            trending_window: chrono_millis(config.trending_window_ms),
            trending_saturation: config.trending_saturation.max(1),
            recency_horizon: chrono_millis(config.recency_horizon_ms.max(1)),
        }
    }

    /// 热度统计窗口的起点
    pub fn trending_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.trending_window
    }

    /// `recent_count` 为同一实体在热度窗口内（含当前事件）的事件数
    pub fn enrich(
        &self,
        event: NormalizedEvent,
        id: EventIdentity,
        received_at: DateTime<Utc>,
        recent_count: usize,
    ) -> EnrichedEvent {
        let priority_base = self.priorities.priority_of(&event.kind);
        let trending_score = self.trending_score(recent_count);
        let composite_priority = self.composite(
            priority_base,
            self.recency(event.occurred_at, received_at),
            trending_score,
        );

        EnrichedEvent::builder()
            .id(id)
            .kind(event.kind)
            .entity_key(event.entity_key)
            .actor(event.actor)
            .occurred_at(event.occurred_at)
            .received_at(received_at)
            .payload(event.payload)
            .priority_base(priority_base)
            .trending_score(trending_score)
            .composite_priority(composite_priority)
            .build()
    }

    pub fn trending_score(&self, recent_count: usize) -> f64 {
        (recent_count as f64 / self.trending_saturation as f64).min(1.0)
    }

    /// 新鲜度：发生即为 1，线性衰减，超过衰减时长后为 0
    pub fn recency(&self, occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_ms = (now - occurred_at).num_milliseconds().max(0) as f64;
        let horizon_ms = self.recency_horizon.num_milliseconds() as f64;
        (1.0 - age_ms / horizon_ms).max(0.0)
    }

    pub fn composite(&self, priority_base: u8, recency: f64, trending_score: f64) -> f64 {
        let max = self.priorities.max_priority();
        let normalized_base = if max == 0 {
            0.0
        } else {
            f64::from(priority_base) / f64::from(max)
        };
        BASE_WEIGHT * normalized_base + RECENCY_WEIGHT * recency + TRENDING_WEIGHT * trending_score
    }
}
