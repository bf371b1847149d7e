use crate::event::EnrichedEvent;
use std::sync::Arc;

/// 待处理队列：仅由批处理调度器持有与修改
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: Vec<Arc<EnrichedEvent>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Arc<EnrichedEvent>) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 按综合优先级稳定降序排序后取出前 `max` 条，其余保持排序后的相对顺序继续排队
    pub fn take_top(&mut self, max: usize) -> Vec<Arc<EnrichedEvent>> {
        // sort_by 为稳定排序，同优先级保留入队顺序
        self.events
            .sort_by(|a, b| b.composite_priority().total_cmp(&a.composite_priority()));
        let n = max.min(self.events.len());
        let rest = self.events.split_off(n);
        std::mem::replace(&mut self.events, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ev(name: &str, priority: f64) -> Arc<EnrichedEvent> {
        let now = Utc::now();
        Arc::new(
            EnrichedEvent::builder()
                .id(name.into())
                .kind("push")
                .entity_key("acme/api")
                .actor(name)
                .occurred_at(now)
                .received_at(now)
                .composite_priority(priority)
                .build(),
        )
    }

    fn names(batch: &[Arc<EnrichedEvent>]) -> Vec<&str> {
        batch.iter().map(|e| e.actor()).collect()
    }

    #[test]
    fn take_top_is_priority_descending_and_stable() {
        let mut q = PendingQueue::new();
        q.push(ev("a", 0.2));
        q.push(ev("b", 0.9));
        q.push(ev("c", 0.2));
        q.push(ev("d", 0.9));
        q.push(ev("e", 0.5));

        let batch = q.take_top(3);

        assert_eq!(names(&batch), ["b", "d", "e"]);
        assert_eq!(q.len(), 2);
        assert_eq!(names(&q.take_top(10)), ["a", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn take_top_on_empty_queue_is_empty() {
        let mut q = PendingQueue::new();
        assert!(q.take_top(5).is_empty());
    }
}
