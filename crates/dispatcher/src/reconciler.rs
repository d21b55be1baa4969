use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use keel_domain::{
    cancellable, CancellationToken, ScheduleFilter, ScheduleRecord, ScheduleRepository,
    ScheduleRequest, ScheduleStatus,
};
use keel_errors::{KeelError, KeelResult};
use keel_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, instrument, warn};

use crate::cron_spec::CronSpec;
use crate::observer::{DropReason, LoggingReloadObserver, ReloadObserver};
use crate::registry::{JobFn, JobRegistry};
use crate::runtime::{CronRuntime, EntryId, EntrySnapshot, WeakCronRuntime};

/// 一次重新加载的结果
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub reinstated: Vec<ScheduleRecord>,
    pub dropped: Vec<(ScheduleRecord, DropReason)>,
    pub failed: Vec<(ScheduleRecord, String)>,
}

impl ReloadReport {
    pub fn total(&self) -> usize {
        self.reinstated.len() + self.dropped.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.failed.is_empty()
    }
}

/// 将持久化的定时任务与进程内cron运行时保持一致
#[derive(Clone)]
pub struct SchedulerReconciler {
    repository: Arc<dyn ScheduleRepository>,
    registry: JobRegistry,
    runtime: CronRuntime,
    observer: Arc<dyn ReloadObserver>,
    metrics: Arc<MetricsCollector>,
}

impl SchedulerReconciler {
    pub fn new(
        repository: Arc<dyn ScheduleRepository>,
        registry: JobRegistry,
        runtime: CronRuntime,
    ) -> Self {
        Self {
            repository,
            registry,
            runtime,
            observer: Arc::new(LoggingReloadObserver),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn runtime(&self) -> &CronRuntime {
        &self.runtime
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// 启动一个命名任务并持久化为运行中记录
    ///
    /// 持久化失败或被取消时会先移除已注册的运行时条目再返回错误。写入期间
    /// 发生的取消在写入完成后生效，已写入的记录会被删除。
    #[instrument(skip(self, request, cancel), fields(schedule.name = %request.name))]
    pub async fn start(
        &self,
        request: ScheduleRequest,
        cancel: &CancellationToken,
    ) -> KeelResult<ScheduleRecord> {
        let task = self
            .registry
            .get(&request.name)
            .ok_or_else(|| KeelError::unknown_job(&request.name))?;

        // 未给出开始时间时不校验窗口，结束时间已过的任务执行一次后自动停止
        if let (Some(start_at), Some(end_at)) = (request.start_at, request.end_at) {
            if end_at < start_at {
                return Err(KeelError::invalid_input(format!(
                    "结束时间 {end_at} 早于开始时间 {start_at}"
                )));
            }
        }
        let start_at = request.start_at.unwrap_or_else(Utc::now);
        let request = ScheduleRequest {
            start_at: Some(start_at),
            ..request
        };

        if cancellable(cancel, self.repository.find_running(&request.name))
            .await?
            .is_some()
        {
            return Err(KeelError::already_running(&request.name));
        }

        let entry_id = self
            .runtime
            .add_with(&request.cron, |entry_id| {
                self.wrap_job(&request.name, task, start_at, request.end_at, entry_id)
            })
            .await?;

        let record = ScheduleRecord::running(&request, entry_id.as_i64());
        if cancel.is_cancelled() {
            self.runtime.remove(entry_id).await;
            return Err(KeelError::Cancelled);
        }

        // 写入一旦发出就等待其完成，取消在写入之后再处理
        let created = match self.repository.create(&record).await {
            Ok(created) => created,
            Err(e) => {
                self.runtime.remove(entry_id).await;
                warn!(entry_id = %entry_id, error = %e, "持久化失败，已撤销运行时条目");
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            self.runtime.remove(entry_id).await;
            if let Err(e) = self.repository.delete(created.id).await {
                warn!(schedule.id = created.id, error = %e, "撤销已取消启动的记录失败");
            }
            debug!(entry_id = %entry_id, "启动已取消，运行时条目与记录均已撤销");
            return Err(KeelError::Cancelled);
        }

        StructuredLogger::log_schedule_started(
            &created.name,
            &created.cron,
            created.entry_id,
            created.id,
        );
        self.metrics.record_schedule_started();
        Ok(created)
    }

    /// 停止运行中的命名任务
    #[instrument(skip(self, cancel))]
    pub async fn stop(&self, name: &str, cancel: &CancellationToken) -> KeelResult<ScheduleRecord> {
        let record = cancellable(cancel, self.repository.find_running(name))
            .await?
            .ok_or_else(|| KeelError::schedule_not_found(name))?;

        if let Some(entry_id) = EntryId::from_i64(record.entry_id) {
            self.runtime.remove(entry_id).await;
        }

        let now = Utc::now();
        if !cancellable(cancel, self.repository.mark_stopped(record.id, now)).await? {
            // 并发的停止或自动过期已经抢先完成
            return Err(KeelError::schedule_not_found(name));
        }

        StructuredLogger::log_schedule_stopped(&record.name, record.entry_id, record.id);
        self.metrics.record_schedule_stopped("manual");

        Ok(ScheduleRecord {
            status: ScheduleStatus::Stopped,
            updated_at: now,
            ..record
        })
    }

    /// 丢弃运行时的全部条目，并按持久化的运行中记录重新签发
    ///
    /// 无法恢复的记录（未知任务、无效表达式、重复名称）先被删除，其余记录
    /// 逐条重新签发。删除失败的记录留在存储中并计入失败。逐条尽力而为，
    /// 只有取消会中断整个过程。
    #[instrument(skip(self, cancel))]
    pub async fn reload(&self, cancel: &CancellationToken) -> KeelResult<ReloadReport> {
        let started = Instant::now();
        self.runtime.clear().await;

        let records = cancellable(cancel, self.repository.list(&ScheduleFilter::running())).await?;
        debug!(count = records.len(), "读取到运行中的定时任务记录");

        // 先分类：同名的运行中记录只保留第一条可恢复的
        let mut seen = HashSet::new();
        let mut dropped = Vec::new();
        let mut candidates = Vec::new();
        for record in records {
            let Some(task) = self.registry.get(&record.name) else {
                dropped.push((record, DropReason::UnknownJob));
                continue;
            };
            if let Err(e) = CronSpec::validate(&record.cron) {
                let reason = match e {
                    KeelError::InvalidCron { message, .. } => DropReason::InvalidCron(message),
                    other => DropReason::InvalidCron(other.to_string()),
                };
                dropped.push((record, reason));
                continue;
            }
            if !seen.insert(record.name.clone()) {
                dropped.push((record, DropReason::Duplicate));
                continue;
            }
            candidates.push((record, task));
        }

        let mut report = ReloadReport::default();

        // 被丢弃的记录先删除，避免与重新签发的记录冲突
        for (record, reason) in dropped {
            if cancel.is_cancelled() {
                return Err(KeelError::Cancelled);
            }
            self.drop_record(record, reason, &mut report, cancel).await?;
        }

        for (record, task) in candidates {
            if cancel.is_cancelled() {
                return Err(KeelError::Cancelled);
            }

            let added = self
                .runtime
                .add_with(&record.cron, |entry_id| {
                    self.wrap_job(&record.name, task, record.start_at, record.end_at, entry_id)
                })
                .await;
            let entry_id = match added {
                Ok(entry_id) => entry_id,
                Err(e) => {
                    let message = e.to_string();
                    self.observer.on_failed(&record, &message);
                    self.metrics.record_reload_record("failed");
                    report.failed.push((record, message));
                    continue;
                }
            };

            let fresh = record.reissued(entry_id.as_i64());
            match cancellable(cancel, self.repository.replace(record.id, &fresh)).await {
                Ok(inserted) => {
                    self.observer.on_reinstated(&record, &inserted);
                    self.metrics.record_reload_record("reinstated");
                    report.reinstated.push(inserted);
                }
                Err(KeelError::Cancelled) => {
                    self.runtime.remove(entry_id).await;
                    return Err(KeelError::Cancelled);
                }
                Err(e) => {
                    self.runtime.remove(entry_id).await;
                    let message = e.to_string();
                    self.observer.on_failed(&record, &message);
                    self.metrics.record_reload_record("failed");
                    report.failed.push((record, message));
                }
            }
        }

        StructuredLogger::log_reload_summary(
            report.reinstated.len(),
            report.dropped.len(),
            report.failed.len(),
        );
        self.metrics
            .record_reload_duration(started.elapsed().as_secs_f64());
        Ok(report)
    }

    pub async fn list_schedules(
        &self,
        filter: &ScheduleFilter,
        cancel: &CancellationToken,
    ) -> KeelResult<Vec<ScheduleRecord>> {
        cancellable(cancel, self.repository.list(filter)).await
    }

    pub async fn runtime_entries(&self) -> Vec<EntrySnapshot> {
        self.runtime.entries().await
    }

    /// 停止计时并丢弃全部条目，持久化记录保持运行中以便下次重新加载
    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
        self.runtime.clear().await;
    }

    async fn drop_record(
        &self,
        record: ScheduleRecord,
        reason: DropReason,
        report: &mut ReloadReport,
        cancel: &CancellationToken,
    ) -> KeelResult<()> {
        match cancellable(cancel, self.repository.delete(record.id)).await {
            Ok(_) => {}
            Err(KeelError::Cancelled) => return Err(KeelError::Cancelled),
            Err(e) => {
                // 记录仍留在存储中，按失败上报
                let message = format!("{reason}: {e}");
                warn!(
                    schedule.name = %record.name,
                    schedule.id = record.id,
                    error = %e,
                    "删除被丢弃的定时任务记录失败"
                );
                self.observer.on_failed(&record, &message);
                self.metrics.record_reload_record("failed");
                report.failed.push((record, message));
                return Ok(());
            }
        }
        self.observer.on_dropped(&record, &reason);
        self.metrics.record_reload_record("dropped");
        report.dropped.push((record, reason));
        Ok(())
    }

    /// 包装任务体：开始时间之前跳过，结束时间之后至多再执行一次，随后移除自身条目并停止记录
    fn wrap_job(
        &self,
        name: &str,
        task: JobFn,
        start_at: DateTime<Utc>,
        end_at: Option<DateTime<Utc>>,
        entry_id: EntryId,
    ) -> JobFn {
        let expiry = Arc::new(Expiry {
            name: name.to_string(),
            entry_id,
            runtime: self.runtime.downgrade(),
            repository: self.repository.clone(),
            metrics: self.metrics.clone(),
            expired: AtomicBool::new(false),
        });

        Arc::new(move || {
            let task = task.clone();
            let expiry = expiry.clone();
            async move {
                if Utc::now() < start_at {
                    debug!(schedule.name = %expiry.name, start_at = %start_at, "未到开始时间，跳过本次执行");
                    return;
                }

                // 结束时间已过时只有抢到过期标记的那次触发会执行任务体
                let claimed = match end_at {
                    Some(end_at) if Utc::now() > end_at => {
                        if !expiry.claim() {
                            debug!(schedule.name = %expiry.name, "任务已过期，跳过本次执行");
                            return;
                        }
                        true
                    }
                    _ => false,
                };

                let started = Instant::now();
                task().await;
                expiry
                    .metrics
                    .record_job_run(&expiry.name, started.elapsed().as_secs_f64());

                if let Some(end_at) = end_at {
                    if claimed || (Utc::now() > end_at && expiry.claim()) {
                        expiry.expire(end_at).await;
                    }
                }
            }
            .boxed()
        })
    }
}

/// 任务体自动过期所需的上下文
struct Expiry {
    name: String,
    entry_id: EntryId,
    runtime: WeakCronRuntime,
    repository: Arc<dyn ScheduleRepository>,
    metrics: Arc<MetricsCollector>,
    expired: AtomicBool,
}

impl Expiry {
    /// 首次调用返回 true，此后的触发都不再执行任务体
    fn claim(&self) -> bool {
        !self.expired.swap(true, Ordering::SeqCst)
    }

    async fn expire(&self, end_at: DateTime<Utc>) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove(self.entry_id).await;
        }

        let record = match self.repository.find_running(&self.name).await {
            Ok(Some(record)) if record.entry_id == self.entry_id.as_i64() => record,
            Ok(_) => {
                debug!(schedule.name = %self.name, entry_id = %self.entry_id, "记录已被停止或重新签发，跳过过期处理");
                return;
            }
            Err(e) => {
                warn!(schedule.name = %self.name, error = %e, "查询过期任务记录失败");
                return;
            }
        };

        match self.repository.mark_stopped(record.id, Utc::now()).await {
            Ok(true) => {
                StructuredLogger::log_schedule_expired(&self.name, record.entry_id, end_at);
                self.metrics.record_schedule_stopped("expired");
            }
            Ok(false) => {
                debug!(schedule.name = %self.name, "记录已被并发停止");
            }
            Err(e) => {
                warn!(schedule.name = %self.name, error = %e, "过期任务停止失败");
            }
        }
    }
}
