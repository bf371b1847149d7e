//! 历史清理（janitor）
//!
//! 独立周期运行，只做清理，不参与接入热路径：
//! - 去重历史中超过 TTL 的身份；
//! - 热度窗口之外的实体活跃度样本；
//! - 超过保留时长的终态回执。
//!
use crate::clock::Clock;
use crate::config::chrono_millis;
use crate::ingest::Deduplicator;
use crate::receipt::ReceiptTracker;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// 单次清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub history: usize,
    pub activity: usize,
    pub receipts: usize,
}

pub struct HistoryJanitor {
    clock: Arc<dyn Clock>,
    dedup: Arc<Deduplicator>,
    receipts: Arc<ReceiptTracker>,
    trending_window: Duration,
    receipt_ttl: Duration,
}

impl HistoryJanitor {
    pub fn new(
        clock: Arc<dyn Clock>,
        dedup: Arc<Deduplicator>,
        receipts: Arc<ReceiptTracker>,
        trending_window_ms: u64,
        receipt_ttl_ms: u64,
    ) -> Self {
        Self {
            clock,
            dedup,
            receipts,
            trending_window: chrono_millis(trending_window_ms),
            receipt_ttl: chrono_millis(receipt_ttl_ms),
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let report = SweepReport {
            history: self.dedup.purge_expired(now),
            activity: self.dedup.purge_activity_before(now - self.trending_window),
            receipts: self.receipts.purge_terminal_before(now - self.receipt_ttl),
        };
        debug!(
            history = report.history,
            activity = report.activity,
            receipts = report.receipts,
            "janitor sweep"
        );
        report
    }
}
