//! 通知监听器（NotificationListener）
//!
//! 定义消费某类/多类/全部通知的处理逻辑与元信息（名称、订阅类型），
//! 供外部监控、告警接入。
//!
use super::{Notification, NotificationKind};
use async_trait::async_trait;

#[derive(Clone, Debug)]
pub enum Interest {
    One(NotificationKind),
    Many(Vec<NotificationKind>),
    All,
}

impl Interest {
    pub fn matches(&self, kind: NotificationKind) -> bool {
        match self {
            Interest::One(k) => *k == kind,
            Interest::Many(ks) => ks.contains(&kind),
            Interest::All => true,
        }
    }
}

/// 通知监听器
#[async_trait]
pub trait NotificationListener: Send + Sync {
    /// 监听器名称（用于日志）
    fn listener_name(&self) -> &str;
    /// 订阅的通知类型
    fn interest(&self) -> Interest;
    /// 处理通知；返回错误只记录日志，不会中断监听循环
    async fn on_notification(&self, notification: &Notification) -> anyhow::Result<()>;
}
