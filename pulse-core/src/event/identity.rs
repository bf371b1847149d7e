use super::NormalizedEvent;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// 事件身份：`实体 + 类型 + 主体 + 时间戳` 以 `:` 拼接而成的确定性字符串
///
/// 字段中的 `%` 与 `:` 先转义为 `%25`、`%3A`，分隔符因此不会与字段内容混淆。
/// 时间戳保留到纳秒，字段仅相差微秒的两个事件仍视为不同事件。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventIdentity(String);

impl EventIdentity {
    pub fn of(event: &NormalizedEvent) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            escape(&event.entity_key),
            escape(&event.kind),
            escape(&event.actor),
            event
                .occurred_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape(field: &str) -> Cow<'_, str> {
    if field.contains(['%', ':']) {
        Cow::Owned(field.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(field)
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
