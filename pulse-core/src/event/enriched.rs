use super::EventIdentity;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 补全并评分后的事件，批处理按 `composite_priority` 降序出队
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct EnrichedEvent {
    /// 去重身份
    id: EventIdentity,
    /// 归一化后的事件类型
    #[builder(into)]
    kind: String,
    /// 事件主体
    #[builder(into)]
    entity_key: String,
    /// 触发者
    #[builder(into)]
    actor: String,
    /// 发生时间（缺失时为接收时间）
    occurred_at: DateTime<Utc>,
    /// 接收时间
    received_at: DateTime<Utc>,
    /// 不透明负载
    #[builder(default)]
    payload: Value,
    /// 按类型查表得到的基础优先级
    #[builder(default)]
    priority_base: u8,
    /// 热度 [0, 1]
    #[builder(default)]
    trending_score: f64,
    /// 综合优先级，仅用于排序
    #[builder(default)]
    composite_priority: f64,
}

impl EnrichedEvent {
    pub fn id(&self) -> &EventIdentity {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn priority_base(&self) -> u8 {
        self.priority_base
    }

    pub fn trending_score(&self) -> f64 {
        self.trending_score
    }

    pub fn composite_priority(&self) -> f64 {
        self.composite_priority
    }
}
