//! 事件模型
//!
//! - `RawEvent`：上游（webhook/轮询）送入的原始事件，字段均可能缺失；
//! - `EventIdentity`：由实体、类型、主体与时间戳拼接出的去重键；
//! - `EnrichedEvent`：补全默认值并附加优先级/热度评分后的事件。
//!
pub mod enriched;
pub mod identity;
pub mod raw;

pub use enriched::EnrichedEvent;
pub use identity::EventIdentity;
pub use raw::{NormalizedEvent, RawEvent, UNKNOWN};
