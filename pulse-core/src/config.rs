//! 聚合器配置
//!
//! 默认值即生产默认；`from_env` 以 `PULSE_*` 环境变量覆盖，无法解析的值回退为默认值。
//!
use crate::error::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// 时长类配置的上限（一年），保证与时间点相加减不会越界
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1_000;
/// 单个回执允许的最大投递次数
pub const MAX_ATTEMPTS_LIMIT: u32 = 32;

/// 毫秒数转为 chrono 时长，超过 `MAX_DURATION_MS` 时取上限
pub fn chrono_millis(ms: u64) -> chrono::Duration {
    let clamped = i64::try_from(ms.min(MAX_DURATION_MS)).unwrap_or(i64::MAX);
    chrono::Duration::milliseconds(clamped)
}

/// 聚合器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// 限流窗口长度
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// 单个窗口内允许接收的最大事件数
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// 去重历史的保留时长
    #[serde(default = "default_event_ttl_ms")]
    pub event_ttl_ms: u64,
    /// 批处理周期
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// 单批最大事件数；待处理队列达到该长度时立即触发一次批处理
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// 历史清理周期
    #[serde(default = "default_janitor_interval_ms")]
    pub janitor_interval_ms: u64,
    /// 重试队列的排空周期
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// 热度统计窗口
    #[serde(default = "default_trending_window_ms")]
    pub trending_window_ms: u64,
    /// 热度饱和值：窗口内同一实体达到该事件数时热度为 1
    #[serde(default = "default_trending_saturation")]
    pub trending_saturation: usize,
    /// 新鲜度线性衰减至 0 的时长
    #[serde(default = "default_recency_horizon_ms")]
    pub recency_horizon_ms: u64,
    /// 单个回执的最大投递次数，达到后进入死信
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 退避基数：第 n 次失败后延迟 `2^n * retry_base_delay_ms`
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 终态回执的保留时长
    #[serde(default = "default_receipt_ttl_ms")]
    pub receipt_ttl_ms: u64,
    /// 查询订阅者回执时返回的最大条数
    #[serde(default = "default_receipts_per_subscriber")]
    pub receipts_per_subscriber: usize,
    /// 批内并发投递上限，`None` 表示不限制
    #[serde(default)]
    pub dispatch_concurrency: Option<usize>,
    /// 通知广播缓冲区容量
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// 监听器并发
    #[serde(default = "default_listener_concurrency")]
    pub listener_concurrency: usize,
    /// 事件类型 -> 基础优先级
    #[serde(default)]
    pub priority_table: PriorityTable,
}

fn default_window_ms() -> u64 {
    1_000
}

fn default_max_events() -> usize {
    1_000
}

fn default_event_ttl_ms() -> u64 {
    60_000
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_max_batch_size() -> usize {
    50
}

fn default_janitor_interval_ms() -> u64 {
    60_000
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

fn default_trending_window_ms() -> u64 {
    5 * 60_000
}

fn default_trending_saturation() -> usize {
    10
}

fn default_recency_horizon_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    5_000
}

fn default_receipt_ttl_ms() -> u64 {
    60 * 60_000
}

fn default_receipts_per_subscriber() -> usize {
    50
}

fn default_notification_capacity() -> usize {
    1_024
}

fn default_listener_concurrency() -> usize {
    8
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_events: default_max_events(),
            event_ttl_ms: default_event_ttl_ms(),
            batch_interval_ms: default_batch_interval_ms(),
            max_batch_size: default_max_batch_size(),
            janitor_interval_ms: default_janitor_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            trending_window_ms: default_trending_window_ms(),
            trending_saturation: default_trending_saturation(),
            recency_horizon_ms: default_recency_horizon_ms(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            receipt_ttl_ms: default_receipt_ttl_ms(),
            receipts_per_subscriber: default_receipts_per_subscriber(),
            dispatch_concurrency: None,
            notification_capacity: default_notification_capacity(),
            listener_concurrency: default_listener_concurrency(),
            priority_table: PriorityTable::default(),
        }
    }
}

impl AggregatorConfig {
    /// 从环境变量加载配置
    ///
    /// - `PULSE_WINDOW_MS`、`PULSE_MAX_EVENTS`
    /// - `PULSE_EVENT_TTL_MS`
    /// - `PULSE_BATCH_INTERVAL_MS`、`PULSE_MAX_BATCH_SIZE`
    /// - `PULSE_JANITOR_INTERVAL_MS`、`PULSE_RETRY_INTERVAL_MS`
    /// - `PULSE_MAX_ATTEMPTS`、`PULSE_RETRY_BASE_DELAY_MS`、`PULSE_RECEIPT_TTL_MS`
    /// - `PULSE_DISPATCH_CONCURRENCY`
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            window_ms: env_or("PULSE_WINDOW_MS", d.window_ms),
            max_events: env_or("PULSE_MAX_EVENTS", d.max_events),
            event_ttl_ms: env_or("PULSE_EVENT_TTL_MS", d.event_ttl_ms),
            batch_interval_ms: env_or("PULSE_BATCH_INTERVAL_MS", d.batch_interval_ms),
            max_batch_size: env_or("PULSE_MAX_BATCH_SIZE", d.max_batch_size),
            janitor_interval_ms: env_or("PULSE_JANITOR_INTERVAL_MS", d.janitor_interval_ms),
            retry_interval_ms: env_or("PULSE_RETRY_INTERVAL_MS", d.retry_interval_ms),
            max_attempts: env_or("PULSE_MAX_ATTEMPTS", d.max_attempts),
            retry_base_delay_ms: env_or("PULSE_RETRY_BASE_DELAY_MS", d.retry_base_delay_ms),
            receipt_ttl_ms: env_or("PULSE_RECEIPT_TTL_MS", d.receipt_ttl_ms),
            dispatch_concurrency: env::var("PULSE_DISPATCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok()),
            ..d
        }
    }

    /// 校验配置：尺寸与周期不得为 0
    pub fn validate(&self) -> PulseResult<()> {
        let checks: [(&str, bool); 8] = [
            ("window_ms", self.window_ms > 0),
            ("max_events", self.max_events > 0),
            ("batch_interval_ms", self.batch_interval_ms > 0),
            ("max_batch_size", self.max_batch_size > 0),
            ("janitor_interval_ms", self.janitor_interval_ms > 0),
            ("retry_interval_ms", self.retry_interval_ms > 0),
            ("max_attempts", self.max_attempts > 0),
            ("trending_saturation", self.trending_saturation > 0),
        ];
        for (name, ok) in checks {
            if !ok {
                return Err(PulseError::invalid_config(format!("{name} must be > 0")));
            }
        }
        if self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(PulseError::invalid_config(format!(
                "max_attempts must be <= {MAX_ATTEMPTS_LIMIT}"
            )));
        }
        let durations: [(&str, u64); 9] = [
            ("window_ms", self.window_ms),
            ("event_ttl_ms", self.event_ttl_ms),
            ("batch_interval_ms", self.batch_interval_ms),
            ("janitor_interval_ms", self.janitor_interval_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("trending_window_ms", self.trending_window_ms),
            ("recency_horizon_ms", self.recency_horizon_ms),
            ("receipt_ttl_ms", self.receipt_ttl_ms),
            ("retry_base_delay_ms", self.retry_base_delay_ms),
        ];
        for (name, ms) in durations {
            if ms > MAX_DURATION_MS {
                return Err(PulseError::invalid_config(format!(
                    "{name} must be <= {MAX_DURATION_MS}"
                )));
            }
        }
        if self.dispatch_concurrency == Some(0) {
            return Err(PulseError::invalid_config(
                "dispatch_concurrency must be > 0 when set",
            ));
        }
        Ok(())
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// 事件类型到基础优先级的映射
///
/// 类型名先做归一化：小写、`-` 转 `_`、去掉 `Event` 后缀，
/// 因此 `PushEvent`、`push` 与 `Push` 对应同一条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "HashMap<String, u8>", into = "HashMap<String, u8>")]
pub struct PriorityTable {
    entries: HashMap<String, u8>,
}

impl PriorityTable {
    pub fn new(entries: impl IntoIterator<Item = (String, u8)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(kind, p)| (normalize_kind(&kind), p))
                .collect(),
        }
    }

    /// 查询基础优先级，未知类型为 0
    pub fn priority_of(&self, kind: &str) -> u8 {
        self.entries
            .get(&normalize_kind(kind))
            .copied()
            .unwrap_or(0)
    }

    /// 表中的最高优先级，用于归一化
    pub fn max_priority(&self) -> u8 {
        self.entries.values().copied().max().unwrap_or(0)
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new(
            [
                ("release", 3),
                ("pull_request", 2),
                ("push", 2),
                ("issues", 1),
                ("issue_comment", 1),
                ("star", 1),
                ("watch", 1),
                ("fork", 1),
            ]
            .into_iter()
            .map(|(k, p)| (k.to_string(), p)),
        )
    }
}

impl From<HashMap<String, u8>> for PriorityTable {
    fn from(entries: HashMap<String, u8>) -> Self {
        Self::new(entries)
    }
}

impl From<PriorityTable> for HashMap<String, u8> {
    fn from(table: PriorityTable) -> Self {
        table.entries
    }
}

/// 事件类型名归一化
pub fn normalize_kind(kind: &str) -> String {
    let trimmed = kind.trim();
    let trimmed = trimmed.strip_suffix("Event").unwrap_or(trimmed);
    let mut out = String::with_capacity(trimmed.len() + 4);
    let mut prev_lower = false;
    for ch in trimmed.chars() {
        match ch {
            '-' | ' ' => out.push('_'),
            c if c.is_ascii_uppercase() => {
                // PullRequest -> pull_request
                if prev_lower {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
    }
    out
}
