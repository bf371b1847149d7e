use crate::clock::Clock;
use crate::config::chrono_millis;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// 固定窗口限流器
///
/// 窗口过期（`now - window_start > window`）时重置计数；
/// 窗口内计数未达上限则放行并计数，否则拒绝。拒绝不排队、不重试。
pub struct AdmissionController {
    clock: Arc<dyn Clock>,
    window: Duration,
    max_events: usize,
    state: Mutex<Window>,
}

struct Window {
    start: DateTime<Utc>,
    count: usize,
}

impl AdmissionController {
    pub fn new(clock: Arc<dyn Clock>, window_ms: u64, max_events: usize) -> Self {
        let start = clock.now();
        Self {
            clock,
            window: chrono_millis(window_ms),
            max_events,
            state: Mutex::new(Window { start, count: 0 }),
        }
    }

    pub fn admit(&self) -> bool {
        let now = self.clock.now();
        let mut w = self.state.lock();

        if now - w.start > self.window {
            w.start = now;
            w.count = 0;
        }

        if w.count < self.max_events {
            w.count += 1;
            true
        } else {
            false
        }
    }

    /// 当前窗口内已放行的数量
    pub fn admitted_in_window(&self) -> usize {
        self.state.lock().count
    }
}
