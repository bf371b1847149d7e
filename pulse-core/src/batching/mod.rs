//! 批处理（batching）
//!
//! 待处理队列按综合优先级稳定降序出队，每批至多 `max_batch_size` 条；
//! 周期 tick 与“队列达到批大小”两种方式触发。
//!
pub mod queue;
pub mod scheduler;
pub mod statistics;

pub use queue::PendingQueue;
pub use scheduler::{Batch, BatchScheduler};
pub use statistics::{Statistics, StatsRecorder};
