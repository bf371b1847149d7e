use crate::config::normalize_kind;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 缺失实体或类型时使用的兜底分组
pub const UNKNOWN: &str = "unknown";

/// 原始事件：不保证唯一，字段可能缺失
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
pub struct RawEvent {
    /// 事件类型标签，如 push / pull_request / issues / star
    #[builder(into)]
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    /// 事件主体，如仓库名；也接受 `{"name": ..}` 对象
    #[builder(into)]
    #[serde(default, alias = "repo", deserialize_with = "name_or_object")]
    pub entity_key: Option<String>,
    /// 触发者；也接受 `{"login": ..}` 对象
    #[builder(into)]
    #[serde(default, deserialize_with = "name_or_object")]
    pub actor: Option<String>,
    /// 事件自身的发生时间
    #[serde(default, alias = "created_at")]
    pub occurred_at: Option<DateTime<Utc>>,
    /// 不透明负载
    #[builder(default)]
    #[serde(default)]
    pub payload: Value,
}

/// 补全默认值后的事件字段
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub kind: String,
    pub entity_key: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
    /// 实体或类型缺失而被归入 `unknown`
    pub malformed: bool,
}

impl RawEvent {
    /// 补全缺失字段；缺少实体或类型的事件归入 `unknown` 而不是被拒绝
    pub fn normalize(self, received_at: DateTime<Utc>) -> NormalizedEvent {
        let kind = non_blank(self.kind).map(|k| normalize_kind(&k));
        let entity_key = non_blank(self.entity_key);
        let malformed = kind.is_none() || entity_key.is_none();

        NormalizedEvent {
            kind: kind.unwrap_or_else(|| UNKNOWN.to_string()),
            entity_key: entity_key.unwrap_or_else(|| UNKNOWN.to_string()),
            actor: non_blank(self.actor).unwrap_or_else(|| UNKNOWN.to_string()),
            occurred_at: self.occurred_at.unwrap_or(received_at),
            payload: self.payload,
            malformed,
        }
    }
}

/// 字符串原样保留；对象取 `login` 或 `name` 字段；其他形态视为缺失
fn name_or_object<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Object(map) => ["login", "name"]
            .into_iter()
            .find_map(|key| map.get(key).and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entity_or_kind_lands_in_unknown_bucket() {
        let now = Utc::now();
        let ev = RawEvent::builder().actor("octocat").build().normalize(now);

        assert!(ev.malformed);
        assert_eq!(ev.kind, UNKNOWN);
        assert_eq!(ev.entity_key, UNKNOWN);
        assert_eq!(ev.actor, "octocat");
        assert_eq!(ev.occurred_at, now);
    }

    #[test]
    fn webhook_style_json_is_accepted() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"type":"PushEvent","repo":"rust-lang/rust","actor":"bors",
                "created_at":"2024-05-01T12:00:00Z","payload":{"size":3}}"#,
        )
        .expect("parse raw event");
        let ev = raw.normalize(Utc::now());

        assert!(!ev.malformed);
        assert_eq!(ev.kind, "push");
        assert_eq!(ev.entity_key, "rust-lang/rust");
        assert_eq!(ev.payload["size"], 3);
    }

    #[test]
    fn github_event_objects_are_unwrapped() {
        let raw: RawEvent = serde_json::from_str(
            r#"{"type":"PullRequestEvent",
                "actor":{"id":1,"login":"octocat","url":"https://api.github.com/users/octocat"},
                "repo":{"id":2,"name":"octo-org/hello-world"},
                "created_at":"2024-05-01T12:00:00Z"}"#,
        )
        .expect("parse github event");
        let ev = raw.normalize(Utc::now());

        assert!(!ev.malformed);
        assert_eq!(ev.kind, "pull_request");
        assert_eq!(ev.entity_key, "octo-org/hello-world");
        assert_eq!(ev.actor, "octocat");

        let odd: RawEvent =
            serde_json::from_str(r#"{"type":"push","repo":{"id":2},"actor":42}"#).expect("parse");
        assert_eq!(odd.entity_key, None);
        assert_eq!(odd.actor, None);
    }
}
