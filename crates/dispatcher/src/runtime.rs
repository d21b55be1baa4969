//! 进程内的cron运行时
//!
//! 每个条目由独立的驱动任务按表达式计时，每次触发都在新派生的任务中执行
//! 任务体，任务体内移除自身条目不会打断正在进行的执行。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_errors::KeelResult;

use crate::cron_spec::CronSpec;
use crate::registry::JobFn;

/// 运行时条目句柄，仅在签发它的运行时实例内有效，且从不为零
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok().filter(|v| *v > 0).map(EntryId)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub expression: String,
    /// 执行频率描述，如 `每10秒`
    pub frequency: String,
    pub next_run: Option<DateTime<Utc>>,
    pub prev_run: Option<DateTime<Utc>>,
}

struct Entry {
    expression: String,
    spec: Arc<CronSpec>,
    job: JobFn,
    token: CancellationToken,
    next_run: Option<DateTime<Utc>>,
    prev_run: Option<DateTime<Utc>>,
}

struct RuntimeState {
    next_id: u64,
    entries: HashMap<EntryId, Entry>,
    started: bool,
    root: CancellationToken,
}

#[derive(Clone)]
pub struct CronRuntime {
    state: Arc<RwLock<RuntimeState>>,
}

/// 不持有运行时的弱引用，供条目内的任务体回指运行时
#[derive(Clone)]
pub struct WeakCronRuntime {
    state: Weak<RwLock<RuntimeState>>,
}

impl WeakCronRuntime {
    pub fn upgrade(&self) -> Option<CronRuntime> {
        self.state.upgrade().map(|state| CronRuntime { state })
    }
}

impl Default for CronRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CronRuntime {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RuntimeState {
                next_id: 1,
                entries: HashMap::new(),
                started: false,
                root: CancellationToken::new(),
            })),
        }
    }

    /// 注册条目；表达式无法解析时返回 `InvalidCron`
    pub async fn add(&self, expression: &str, job: JobFn) -> KeelResult<EntryId> {
        self.add_with(expression, |_| job).await
    }

    /// 注册条目，任务体在构造时即可拿到自己的条目ID
    pub async fn add_with<F>(&self, expression: &str, make_job: F) -> KeelResult<EntryId>
    where
        F: FnOnce(EntryId) -> JobFn,
    {
        let spec = Arc::new(CronSpec::parse(expression)?);

        let mut state = self.state.write().await;
        let id = EntryId(state.next_id);
        state.next_id += 1;
        let job = make_job(id);

        let token = state.root.child_token();
        if state.started {
            self.spawn_driver(id, spec.clone(), job.clone(), token.clone());
        }
        state.entries.insert(
            id,
            Entry {
                expression: expression.to_string(),
                spec,
                job,
                token,
                next_run: None,
                prev_run: None,
            },
        );

        debug!(entry_id = %id, expression = expression, "注册cron条目");
        Ok(id)
    }

    /// 移除条目并停止其计时，返回条目是否存在
    pub async fn remove(&self, id: EntryId) -> bool {
        let removed = self.state.write().await.entries.remove(&id);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                debug!(entry_id = %id, "移除cron条目");
                true
            }
            None => false,
        }
    }

    /// 丢弃全部条目
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.entries.len();
        for (_, entry) in state.entries.drain() {
            entry.token.cancel();
        }
        if count > 0 {
            debug!(count = count, "清空cron条目");
        }
        count
    }

    pub fn downgrade(&self) -> WeakCronRuntime {
        WeakCronRuntime {
            state: Arc::downgrade(&self.state),
        }
    }

    pub async fn contains(&self, id: EntryId) -> bool {
        self.state.read().await.entries.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.started
    }

    /// 按条目ID排序的快照
    pub async fn entries(&self) -> Vec<EntrySnapshot> {
        let state = self.state.read().await;
        let mut snapshots: Vec<EntrySnapshot> = state
            .entries
            .iter()
            .map(|(id, entry)| EntrySnapshot {
                id: *id,
                expression: entry.expression.clone(),
                frequency: entry.spec.frequency_description(),
                next_run: entry
                    .next_run
                    .or_else(|| entry.spec.next_after(Utc::now())),
                prev_run: entry.prev_run,
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// 启动所有已注册条目的计时，之后注册的条目立即开始计时
    pub async fn start(&self) {
        let mut state = self.state.write().await;
        if state.started {
            return;
        }
        state.started = true;
        state.root = CancellationToken::new();

        let root = state.root.clone();
        for (id, entry) in state.entries.iter_mut() {
            entry.token = root.child_token();
            self.spawn_driver(*id, entry.spec.clone(), entry.job.clone(), entry.token.clone());
        }
        info!(entries = state.entries.len(), "cron运行时已启动");
    }

    /// 停止计时，条目保留，已派生的执行不受影响
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if !state.started {
            return;
        }
        state.started = false;
        state.root.cancel();
        info!(entries = state.entries.len(), "cron运行时已停止");
    }

    fn spawn_driver(&self, id: EntryId, spec: Arc<CronSpec>, job: JobFn, token: CancellationToken) {
        let weak = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            let mut last = Utc::now();
            loop {
                let Some(next) = spec.next_after(last) else {
                    debug!(entry_id = %id, "没有后续触发时间，条目结束计时");
                    break;
                };
                let Some(state) = weak.upgrade() else {
                    break;
                };

                if let Some(entry) = state.write().await.entries.get_mut(&id) {
                    entry.next_run = Some(next);
                }
                drop(state);

                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if token.is_cancelled() {
                    break;
                }

                if let Some(state) = weak.upgrade() {
                    if let Some(entry) = state.write().await.entries.get_mut(&id) {
                        entry.prev_run = Some(next);
                    }
                }
                tokio::spawn(job());
                last = next;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_entry_ids_are_non_zero_and_increasing() {
        let runtime = CronRuntime::new();
        let noop: JobFn = Arc::new(|| async {}.boxed());
        let first = runtime.add("@every 1h", noop.clone()).await.unwrap();
        let second = runtime.add("@hourly", noop).await.unwrap();

        assert_eq!(first.as_i64(), 1);
        assert!(second > first);
        assert_eq!(EntryId::from_i64(0), None);
        assert_eq!(EntryId::from_i64(2), Some(second));

        let entries = runtime.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].expression, "@every 1h");
        assert_eq!(entries[0].frequency, "每1小时");
        assert!(entries[0].next_run.is_some());
    }

    #[tokio::test]
    async fn test_invalid_expression_is_rejected() {
        let runtime = CronRuntime::new();
        let noop: JobFn = Arc::new(|| async {}.boxed());
        assert!(runtime.add("every minute", noop).await.is_err());
        assert!(runtime.is_empty().await);
    }

    #[tokio::test]
    async fn test_started_runtime_fires_and_remove_stops() {
        let runtime = CronRuntime::new();
        runtime.start().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let id = runtime
            .add("@every 30ms", counting_job(counter.clone()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert!(runtime.entries().await[0].prev_run.is_some());

        assert!(runtime.remove(id).await);
        assert!(!runtime.remove(id).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_remove = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_remove);
    }

    #[tokio::test]
    async fn test_entries_wait_for_start_and_stop_on_shutdown() {
        let runtime = CronRuntime::new();
        let counter = Arc::new(AtomicUsize::new(0));
        runtime
            .add("@every 20ms", counting_job(counter.clone()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        runtime.start().await;
        assert!(runtime.is_running().await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);

        runtime.shutdown().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_shutdown = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_shutdown);
        assert_eq!(runtime.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_discards_all_entries() {
        let runtime = CronRuntime::new();
        runtime.start().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let id = runtime
            .add("@every 20ms", counting_job(counter.clone()))
            .await
            .unwrap();
        runtime
            .add("@every 20ms", counting_job(counter.clone()))
            .await
            .unwrap();

        assert_eq!(runtime.clear().await, 2);
        assert!(!runtime.contains(id).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_clear = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_clear);
    }
}
