use crate::config::normalize_kind;
use crate::event::EnrichedEvent;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_CHANNEL: &str = "websocket";

/// 允许的事件类型：全部，或指定集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KindsRepr", into = "KindsRepr")]
pub enum AllowedKinds {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl AllowedKinds {
    pub fn only<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Only(kinds.into_iter().map(|k| normalize_kind(k.as_ref())).collect())
    }

    pub fn allows(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(kind),
        }
    }
}

/// 序列化形态：`"all"` / `"*"` 或类型列表
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KindsRepr {
    Wildcard(String),
    List(Vec<String>),
}

impl From<KindsRepr> for AllowedKinds {
    fn from(repr: KindsRepr) -> Self {
        match repr {
            KindsRepr::Wildcard(w) if w == "all" || w == "*" => AllowedKinds::All,
            KindsRepr::Wildcard(single) => AllowedKinds::only([single]),
            KindsRepr::List(list) if list.iter().any(|k| k == "all" || k == "*") => {
                AllowedKinds::All
            }
            KindsRepr::List(list) => AllowedKinds::only(list),
        }
    }
}

impl From<AllowedKinds> for KindsRepr {
    fn from(kinds: AllowedKinds) -> Self {
        match kinds {
            AllowedKinds::All => KindsRepr::Wildcard("all".to_string()),
            AllowedKinds::Only(set) => KindsRepr::List(set.into_iter().collect()),
        }
    }
}

/// 订阅者过滤条件
///
/// `digest_mode` 仅做保存与回显，不改变投递行为。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFilter {
    #[serde(default)]
    pub min_priority: u8,
    #[serde(default)]
    pub allowed_kinds: AllowedKinds,
    /// 有序、去重的通道列表
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub digest_mode: bool,
}

fn default_channels() -> Vec<String> {
    vec![DEFAULT_CHANNEL.to_string()]
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            min_priority: 0,
            allowed_kinds: AllowedKinds::All,
            channels: default_channels(),
            digest_mode: false,
        }
    }
}

impl UserFilter {
    /// 事件优先级不低于下限，且类型在允许范围内
    pub fn passes(&self, event: &EnrichedEvent) -> bool {
        event.priority_base() >= self.min_priority && self.allowed_kinds.allows(event.kind())
    }

    /// 去掉空白与重复通道，保持首次出现的顺序
    fn normalized(mut self) -> Self {
        let mut seen = BTreeSet::new();
        self.channels = self
            .channels
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        self
    }
}

/// 过滤引擎：无副作用、无 I/O，可在派发路径上按事件、按订阅者调用
#[derive(Default)]
pub struct FilterEngine {
    filters: DashMap<String, UserFilter>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_user_filter(&self, subscriber_id: impl Into<String>, filter: UserFilter) {
        self.filters.insert(subscriber_id.into(), filter.normalized());
    }

    pub fn user_filter(&self, subscriber_id: &str) -> Option<UserFilter> {
        self.filters.get(subscriber_id).map(|f| f.value().clone())
    }

    pub fn remove_user_filter(&self, subscriber_id: &str) -> Option<UserFilter> {
        self.filters.remove(subscriber_id).map(|(_, f)| f)
    }

    /// 未设置过滤条件的订阅者按默认条件（全部放行）判定
    pub fn passes_filter(&self, subscriber_id: &str, event: &EnrichedEvent) -> bool {
        match self.filters.get(subscriber_id) {
            Some(f) => f.passes(event),
            None => UserFilter::default().passes(event),
        }
    }

    /// 已登记的订阅者（有序）
    pub fn subscribers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.filters.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 通过过滤的订阅者及其通道列表
    pub fn routes_for(&self, event: &EnrichedEvent) -> Vec<(String, Vec<String>)> {
        let mut routes: Vec<(String, Vec<String>)> = self
            .filters
            .iter()
            .filter(|e| e.value().passes(event))
            .map(|e| (e.key().clone(), e.value().channels.clone()))
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        routes
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
