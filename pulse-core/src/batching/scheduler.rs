use super::{PendingQueue, StatsRecorder};
use crate::event::EnrichedEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// 一个已组好的批次（按综合优先级降序）
#[derive(Debug, Clone)]
pub struct Batch {
    pub events: Vec<Arc<EnrichedEvent>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// 批处理调度器
///
/// 组批在锁内同步完成，不跨越 await；
/// 一次组批结束前，其他 tick 或 flush 看不到中间状态。
pub struct BatchScheduler {
    queue: Mutex<PendingQueue>,
    max_batch_size: usize,
    stats: Arc<StatsRecorder>,
}

impl BatchScheduler {
    pub fn new(max_batch_size: usize, stats: Arc<StatsRecorder>) -> Self {
        Self {
            queue: Mutex::new(PendingQueue::new()),
            max_batch_size: max_batch_size.max(1),
            stats,
        }
    }

    /// 入队；返回队列是否已达到批大小（调用方应立即触发一次 tick）
    pub fn enqueue(&self, event: Arc<EnrichedEvent>) -> bool {
        let mut q = self.queue.lock();
        q.push(event);
        q.len() >= self.max_batch_size
    }

    /// 取出一批；队列为空时返回 None
    pub fn next_batch(&self) -> Option<Batch> {
        let events = {
            let mut q = self.queue.lock();
            if q.is_empty() {
                return None;
            }
            q.take_top(self.max_batch_size)
        };

        self.stats.record_batch(events.len());
        trace!(size = events.len(), "batch formed");

        Some(Batch { events })
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}
