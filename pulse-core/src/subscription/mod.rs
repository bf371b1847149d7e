//! 订阅者侧（subscription）
//!
//! - `FilterEngine`：按订阅者保存过滤条件，纯函数式判定事件是否投递；
//! - `SubscriberRouter`：标准 `EventSink` 实现，按过滤结果与通道列表投递，
//!   每次投递签发回执并记录确认/失败。
//!
pub mod filter;
pub mod router;

pub use filter::{AllowedKinds, FilterEngine, UserFilter};
pub use router::{ChannelTransport, SubscriberRouter};
