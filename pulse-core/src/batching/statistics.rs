use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 运行统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// 已组批派发的事件数
    pub total_processed: u64,
    /// 已派发的批次数
    pub batches_sent: u64,
    /// 被丢弃的事件数（限流 + 重复）
    pub events_dropped: u64,
    /// 平均批大小
    pub average_batch_size: f64,
    pub rate_limited: u64,
    pub duplicates: u64,
    /// 缺少实体或类型、被归入 unknown 的事件数（仍被接收）
    pub malformed: u64,
    /// 当前待处理队列长度
    pub pending: u64,
    /// 投递到下游失败的事件数
    pub dispatch_failures: u64,
}

/// 统计计数器
#[derive(Debug, Default)]
pub struct StatsRecorder {
    total_processed: AtomicU64,
    batches_sent: AtomicU64,
    rate_limited: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    dispatch_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn record_batch(&self, size: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.total_processed
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failures(&self, n: usize) {
        self.dispatch_failures
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> Statistics {
        let total_processed = self.total_processed.load(Ordering::Relaxed);
        let batches_sent = self.batches_sent.load(Ordering::Relaxed);
        let rate_limited = self.rate_limited.load(Ordering::Relaxed);
        let duplicates = self.duplicates.load(Ordering::Relaxed);

        Statistics {
            total_processed,
            batches_sent,
            events_dropped: rate_limited + duplicates,
            average_batch_size: if batches_sent == 0 {
                0.0
            } else {
                total_processed as f64 / batches_sent as f64
            },
            rate_limited,
            duplicates,
            malformed: self.malformed.load(Ordering::Relaxed),
            pending: pending as u64,
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}
