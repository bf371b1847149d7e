//! 聚合核心统一错误定义
//!
//! 仅覆盖投递、回执状态机与配置校验等最小必要集合；
//! 限流拒绝与重复事件属于预期结果，以返回值表达，不进入错误类型。
//!
use thiserror::Error;

use crate::receipt::ReceiptStatus;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PulseError {
    // --- 投递 ---
    #[error("sink error: {reason}")]
    Sink { reason: String },
    #[error("transport error: subscriber={subscriber}, channel={channel}, reason={reason}")]
    Transport {
        subscriber: String,
        channel: String,
        reason: String,
    },
    #[error("notification stream lagged: {reason}")]
    NotificationLagged { reason: String },

    // --- 运行时 ---
    #[error("engine already running")]
    AlreadyRunning,

    // --- 回执 ---
    #[error("receipt not found: {token}")]
    ReceiptNotFound { token: String },
    #[error("invalid receipt transition: token={token}, from={from}, to={to}")]
    InvalidTransition {
        token: String,
        from: ReceiptStatus,
        to: ReceiptStatus,
    },

    // --- 配置 ---
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl PulseError {
    pub fn sink(reason: impl Into<String>) -> Self {
        Self::Sink {
            reason: reason.into(),
        }
    }

    pub fn transport(
        subscriber: impl Into<String>,
        channel: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Transport {
            subscriber: subscriber.into(),
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn notification_lagged(reason: impl Into<String>) -> Self {
        Self::NotificationLagged {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type PulseResult<T> = Result<T, PulseError>;
