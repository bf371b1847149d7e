//! 运行时（engine）
//!
//! 统一管理长驻任务：
//! - 周期任务（批处理 tick、历史清理、重试排空）；
//! - 监听循环：订阅通知流，按监听器兴趣分发并发执行；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::{Interest, NotificationBus, NotificationListener, NotificationKind};
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 运行句柄：用于关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 停止调度；已经开始的一轮任务会执行完毕
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 以固定周期执行 `f`，直至取消；错过的 tick 直接跳过
pub(crate) fn spawn_periodic<F, Fut>(
    token: CancellationToken,
    interval: Duration,
    mut f: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval 的首个 tick 立即完成，跳过以免启动即触发
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    })
}

#[derive(Clone, Default)]
pub(crate) struct ListenerRegistry {
    by_kind: HashMap<NotificationKind, Vec<Arc<dyn NotificationListener>>>,
    all: Vec<Arc<dyn NotificationListener>>,
}

impl ListenerRegistry {
    pub(crate) fn new(listeners: &[Arc<dyn NotificationListener>]) -> Self {
        let mut by_kind: HashMap<NotificationKind, Vec<Arc<dyn NotificationListener>>> =
            HashMap::new();
        let mut all = Vec::new();

        for l in listeners {
            match l.interest() {
                Interest::All => all.push(l.clone()),
                Interest::One(k) => by_kind.entry(k).or_default().push(l.clone()),
                Interest::Many(ks) => {
                    for k in ks {
                        by_kind.entry(k).or_default().push(l.clone());
                    }
                }
            }
        }

        Self { by_kind, all }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_kind.is_empty() && self.all.is_empty()
    }

    fn matching(&self, kind: NotificationKind) -> Vec<Arc<dyn NotificationListener>> {
        let mut merged = Vec::new();
        if let Some(list) = self.by_kind.get(&kind) {
            merged.extend(list.iter().cloned());
        }
        merged.extend(self.all.iter().cloned());
        merged
    }
}

/// 监听循环：订阅总线并把每条通知分发给匹配的监听器
pub(crate) fn spawn_listener_loop(
    token: CancellationToken,
    bus: &NotificationBus,
    registry: ListenerRegistry,
    concurrency: usize,
) -> JoinHandle<()> {
    // 在 spawn 之前订阅，保证启动后发布的通知不会丢失
    let mut stream = bus.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                maybe = stream.next() => {
                    match maybe {
                        Some(Ok(notification)) => {
                            let listeners = registry.matching(notification.kind());
                            if listeners.is_empty() { continue; }

                            stream::iter(listeners)
                                .for_each_concurrent(Some(concurrency.max(1)), |l| {
                                    let n = notification.clone();
                                    async move {
                                        if let Err(err) = l.on_notification(&n).await {
                                            warn!(
                                                listener = l.listener_name(),
                                                kind = %n.kind(),
                                                error = %err,
                                                "notification listener failed"
                                            );
                                        }
                                    }
                                })
                                .await;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "notification listener lagged");
                        }
                        None => break,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::Notification;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        name: &'static str,
        interest: Interest,
        seen: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationListener for Counter {
        fn listener_name(&self) -> &str {
            self.name
        }
        fn interest(&self) -> Interest {
            self.interest.clone()
        }
        async fn on_notification(&self, _n: &Notification) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                anyhow::bail!("listener refused");
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listener_loop_routes_by_interest_and_survives_errors() {
        let bus = NotificationBus::new(32);
        let errors_only = Arc::new(AtomicUsize::new(0));
        let everything = Arc::new(AtomicUsize::new(0));
        let listeners: Vec<Arc<dyn NotificationListener>> = vec![
            Arc::new(Counter {
                name: "errors",
                interest: Interest::One(NotificationKind::BatchError),
                seen: errors_only.clone(),
                fail: true,
            }),
            Arc::new(Counter {
                name: "all",
                interest: Interest::All,
                seen: everything.clone(),
                fail: false,
            }),
        ];

        let mut handle = EngineHandle::new(CancellationToken::new());
        handle.push(spawn_listener_loop(
            handle.token(),
            &bus,
            ListenerRegistry::new(&listeners),
            4,
        ));

        for _ in 0..2 {
            bus.publish(Notification::BatchError {
                count: 1,
                reason: "x".into(),
                timestamp: Utc::now(),
            });
        }
        bus.publish(Notification::BatchProcessed {
            count: 1,
            failed: 0,
            timestamp: Utc::now(),
        });

        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while everything.load(Ordering::Relaxed) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await;

        assert_eq!(errors_only.load(Ordering::Relaxed), 2);
        assert_eq!(everything.load(Ordering::Relaxed), 3);
    }
}
