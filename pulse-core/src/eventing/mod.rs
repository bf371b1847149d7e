//! 事件投递与通知（eventing）
//!
//! - `EventSink`：下游投递协议，拒绝（`Err`）是唯一的失败信号；
//! - `DeliveryDispatcher`：批内并发投递，单条失败不影响整批；
//! - `NotificationBus`：基于广播的运行通知（`batch:processed`、`receipt:dead_letter` 等）；
//! - `NotificationListener`：按通知类型订阅的监听器；
//! - `engine`：周期任务与监听循环的启动、关闭与等待。
//!
//! 该模块只定义协议与运行时，不绑定具体传输实现。
//!
pub mod dispatcher;
pub mod engine;
pub mod listener;
pub mod notification;
pub mod sink;

pub use dispatcher::{DeliveryDispatcher, DispatchReport};
pub use engine::EngineHandle;
pub use listener::{Interest, NotificationListener};
pub use notification::{Notification, NotificationBus, NotificationKind};
pub use sink::EventSink;
