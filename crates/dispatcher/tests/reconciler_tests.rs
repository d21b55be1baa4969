use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keel_dispatcher::{CronRuntime, DropReason, EntryId, JobRegistry, SchedulerReconciler};
use keel_domain::{
    CancellationToken, KeelError, ScheduleFilter, ScheduleRepository, ScheduleRequest,
    ScheduleStatus,
};
use keel_testing_utils::{
    counting_registry, MockScheduleRepository, RecordingReloadObserver, ScheduleRecordBuilder,
    TestEnv,
};

const FAST: &str = "@every 50ms";

fn reconciler_with(
    repo: &MockScheduleRepository,
    registry: JobRegistry,
) -> (SchedulerReconciler, RecordingReloadObserver) {
    let observer = RecordingReloadObserver::new();
    let reconciler = SchedulerReconciler::new(Arc::new(repo.clone()), registry, CronRuntime::new())
        .with_observer(Arc::new(observer.clone()));
    (reconciler, observer)
}

#[tokio::test]
async fn test_start_persists_running_record_and_fires() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, counters) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;
    let cancel = CancellationToken::new();

    let record = reconciler
        .start(ScheduleRequest::new("tick", FAST), &cancel)
        .await?;

    assert_eq!(record.status, ScheduleStatus::Running);
    assert!(record.entry_id > 0);
    let entry_id = EntryId::from_i64(record.entry_id).unwrap();
    assert!(reconciler.runtime().contains(entry_id).await);
    assert_eq!(record.payload["action"], "start");

    let counter = counters[0].clone();
    let fired = TestEnv::wait_for(
        || {
            let counter = counter.clone();
            async move { counter.load(Ordering::SeqCst) >= 2 }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(fired);

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_start_rejects_unknown_job_without_side_effects() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);

    let result = reconciler
        .start(
            ScheduleRequest::new("missing", FAST),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(KeelError::UnknownJobName { .. })));
    assert_eq!(repo.count(), 0);
    assert!(reconciler.runtime().is_empty().await);
}

#[tokio::test]
async fn test_start_rejects_second_running_instance() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    let cancel = CancellationToken::new();

    reconciler
        .start(ScheduleRequest::new("tick", "@hourly"), &cancel)
        .await?;
    let second = reconciler
        .start(ScheduleRequest::new("tick", "@daily"), &cancel)
        .await;

    assert!(matches!(second, Err(KeelError::AlreadyRunning { .. })));
    assert_eq!(repo.running("tick").len(), 1);
    assert_eq!(reconciler.runtime().len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_start_rejects_invalid_cron_and_window() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    let cancel = CancellationToken::new();

    let invalid = reconciler
        .start(ScheduleRequest::new("tick", "every now and then"), &cancel)
        .await;
    assert!(matches!(invalid, Err(KeelError::InvalidCron { .. })));

    let now = Utc::now();
    let inverted = reconciler
        .start(
            ScheduleRequest::new("tick", FAST)
                .with_start_at(now)
                .with_end_at(now - chrono::Duration::seconds(5)),
            &cancel,
        )
        .await;
    assert!(matches!(inverted, Err(KeelError::InvalidInput(_))));

    assert_eq!(repo.count(), 0);
    assert!(reconciler.runtime().is_empty().await);
}

#[tokio::test]
async fn test_persistence_failure_removes_runtime_entry() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    repo.fail_next_create();

    let result = reconciler
        .start(ScheduleRequest::new("tick", FAST), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(KeelError::Persistence(_))));
    assert!(reconciler.runtime().is_empty().await);
    assert_eq!(repo.count(), 0);
}

#[tokio::test]
async fn test_cancelled_start_removes_runtime_entry() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    repo.set_create_delay(Duration::from_millis(500));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = reconciler
        .start(ScheduleRequest::new("tick", FAST), &cancel)
        .await;

    assert!(matches!(result, Err(KeelError::Cancelled)));
    assert!(reconciler.runtime().is_empty().await);
    assert_eq!(repo.count(), 0);

    // 取消后不会残留运行中记录，同名任务可以再次启动
    let restarted = reconciler
        .start(ScheduleRequest::new("tick", FAST), &CancellationToken::new())
        .await
        .expect("restart after cancelled start");
    assert_eq!(repo.running("tick").len(), 1);
    assert_eq!(repo.running("tick")[0].id, restarted.id);
}

#[tokio::test]
async fn test_stop_marks_record_and_removes_entry() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, counters) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;
    let cancel = CancellationToken::new();

    let started = reconciler
        .start(ScheduleRequest::new("tick", FAST), &cancel)
        .await?;
    let stopped = reconciler.stop("tick", &cancel).await?;

    assert_eq!(stopped.id, started.id);
    assert_eq!(stopped.status, ScheduleStatus::Stopped);
    assert!(reconciler.runtime().is_empty().await);
    assert!(repo.running("tick").is_empty());
    assert_eq!(
        repo.find_by_id(started.id).await?.map(|r| r.status),
        Some(ScheduleStatus::Stopped)
    );

    tokio::time::sleep(Duration::from_millis(60)).await;
    let after_stop = counters[0].load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counters[0].load(Ordering::SeqCst), after_stop);

    let again = reconciler.stop("tick", &cancel).await;
    assert!(matches!(again, Err(KeelError::ScheduleNotFound { .. })));

    // 停止后可以再次启动
    reconciler
        .start(ScheduleRequest::new("tick", FAST), &cancel)
        .await?;
    assert_eq!(repo.running("tick").len(), 1);

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_unknown_schedule() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);

    let result = reconciler.stop("tick", &CancellationToken::new()).await;
    assert!(matches!(result, Err(KeelError::ScheduleNotFound { .. })));
}

#[tokio::test]
async fn test_schedule_expires_after_end_time() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, counters) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;

    let record = reconciler
        .start(
            ScheduleRequest::new("tick", FAST)
                .with_end_at(Utc::now() + chrono::Duration::milliseconds(120)),
            &CancellationToken::new(),
        )
        .await?;

    let probe = repo.clone();
    let expired = TestEnv::wait_for(
        || {
            let probe = probe.clone();
            async move { probe.running("tick").is_empty() }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(expired);
    assert!(reconciler.runtime().is_empty().await);
    assert_eq!(
        repo.find_by_id(record.id).await?.map(|r| r.status),
        Some(ScheduleStatus::Stopped)
    );

    let runs = counters[0].load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counters[0].load(Ordering::SeqCst), runs);

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_past_end_time_fires_once_then_stops() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let registry = JobRegistry::builder()
        .register("slow", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
        })
        .build();
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;

    let before = Utc::now();
    let record = reconciler
        .start(
            ScheduleRequest::new("slow", "@every 10ms")
                .with_end_at(before - chrono::Duration::seconds(1)),
            &CancellationToken::new(),
        )
        .await?;
    assert!(record.start_at >= before);

    let probe = repo.clone();
    let stopped = TestEnv::wait_for(
        || {
            let probe = probe.clone();
            async move { probe.running("slow").is_empty() }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(stopped);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(reconciler.runtime().is_empty().await);
    assert_eq!(
        repo.find_by_id(record.id).await?.map(|r| r.status),
        Some(ScheduleStatus::Stopped)
    );

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_expiry_only_stops_its_own_record() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let registry = JobRegistry::builder()
        .register("slow", || async {
            tokio::time::sleep(Duration::from_millis(250)).await;
        })
        .build();
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;
    let cancel = CancellationToken::new();

    reconciler
        .start(
            ScheduleRequest::new("slow", FAST)
                .with_end_at(Utc::now() + chrono::Duration::milliseconds(80)),
            &cancel,
        )
        .await?;

    // 第一次执行仍在进行时停止并以新的条目重新启动
    tokio::time::sleep(Duration::from_millis(70)).await;
    reconciler.stop("slow", &cancel).await?;
    let restarted = reconciler
        .start(ScheduleRequest::new("slow", "@hourly"), &cancel)
        .await?;

    // 旧执行结束后才会触发过期逻辑
    tokio::time::sleep(Duration::from_millis(400)).await;

    let running = repo.running("slow");
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, restarted.id);
    let entry_id = EntryId::from_i64(restarted.entry_id).unwrap();
    assert!(reconciler.runtime().contains(entry_id).await);

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_job_body_skipped_before_start_time() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, counters) = counting_registry(&["tick"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    reconciler.runtime().start().await;

    let start_at = Utc::now() + chrono::Duration::hours(1);
    let record = reconciler
        .start(
            ScheduleRequest::new("tick", FAST).with_start_at(start_at),
            &CancellationToken::new(),
        )
        .await?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    assert_eq!(record.start_at, start_at);
    assert!(record.is_running());

    reconciler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_reload_reinstates_and_drops() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha", "beta"]);
    let (reconciler, observer) = reconciler_with(&repo, registry);

    let alpha = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("alpha")
            .with_cron("@hourly")
            .with_entry_id(41)
            .build(),
    );
    let ghost = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("ghost")
            .with_entry_id(42)
            .build(),
    );
    let broken = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("beta")
            .with_cron("not a cron")
            .with_entry_id(43)
            .build(),
    );
    let twin = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("alpha")
            .with_cron("@daily")
            .with_entry_id(44)
            .build(),
    );
    repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("beta")
            .stopped()
            .build(),
    );

    let report = reconciler.reload(&CancellationToken::new()).await?;

    assert_eq!(report.reinstated.len(), 1);
    assert_eq!(report.dropped.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(report.total(), 4);
    assert!(!report.is_clean());

    let fresh = &report.reinstated[0];
    assert_eq!(fresh.name, "alpha");
    assert_eq!(fresh.cron, "@hourly");
    assert_ne!(fresh.id, alpha.id);
    let entry_id = EntryId::from_i64(fresh.entry_id).unwrap();
    assert!(reconciler.runtime().contains(entry_id).await);
    assert_eq!(reconciler.runtime().len().await, 1);

    let dropped: Vec<(String, DropReason)> = observer.dropped();
    assert_eq!(dropped[0], ("ghost".to_string(), DropReason::UnknownJob));
    assert!(matches!(dropped[1].1, DropReason::InvalidCron(_)));
    assert_eq!(dropped[2], ("alpha".to_string(), DropReason::Duplicate));
    assert_eq!(observer.reinstated(), vec![(alpha.id, fresh.id)]);

    for stale in [&alpha, &ghost, &broken, &twin] {
        assert!(repo.find_by_id(stale.id).await?.is_none());
    }
    let running = reconciler
        .list_schedules(&ScheduleFilter::running(), &CancellationToken::new())
        .await?;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, fresh.id);
    assert_eq!(repo.count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_reload_failure_keeps_stale_record() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha", "beta"]);
    let (reconciler, observer) = reconciler_with(&repo, registry);

    repo.insert_raw(ScheduleRecordBuilder::new().with_name("alpha").build());
    let beta = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("beta")
            .with_entry_id(9)
            .build(),
    );
    repo.fail_replace_for("beta");

    let report = reconciler.reload(&CancellationToken::new()).await?;

    assert_eq!(report.reinstated.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.id, beta.id);
    assert_eq!(observer.failed().len(), 1);

    let kept = repo.find_by_id(beta.id).await?.unwrap();
    assert_eq!(kept.entry_id, 9);
    assert!(kept.is_running());
    assert_eq!(reconciler.runtime().len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_reload_reports_undeletable_record_as_failed() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha"]);
    let (reconciler, observer) = reconciler_with(&repo, registry);

    let alpha = repo.insert_raw(ScheduleRecordBuilder::new().with_name("alpha").build());
    let ghost = repo.insert_raw(
        ScheduleRecordBuilder::new()
            .with_name("ghost")
            .with_entry_id(5)
            .build(),
    );
    repo.fail_deletes();

    let report = reconciler.reload(&CancellationToken::new()).await?;

    assert!(report.dropped.is_empty());
    assert!(observer.dropped().is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.id, ghost.id);
    assert_eq!(observer.failed().len(), 1);

    // 删除失败的记录仍是运行中，其余记录照常恢复
    let kept = repo.find_by_id(ghost.id).await?.unwrap();
    assert!(kept.is_running());
    assert_eq!(report.reinstated.len(), 1);
    assert_eq!(report.reinstated[0].name, "alpha");
    assert!(repo.find_by_id(alpha.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reload_discards_previous_entries() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    let cancel = CancellationToken::new();

    let started = reconciler
        .start(ScheduleRequest::new("alpha", "@hourly"), &cancel)
        .await?;
    let report = reconciler.reload(&cancel).await?;

    let fresh = &report.reinstated[0];
    assert_ne!(fresh.entry_id, started.entry_id);
    let entries = reconciler.runtime_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id.as_i64(), fresh.entry_id);
    assert_eq!(entries[0].frequency, "每1小时");
    assert!(repo.find_by_id(started.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reload_honours_cancellation() {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha"]);
    let (reconciler, _) = reconciler_with(&repo, registry);
    let stale = repo.insert_raw(ScheduleRecordBuilder::new().with_name("alpha").build());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = reconciler.reload(&cancel).await;

    assert!(matches!(result, Err(KeelError::Cancelled)));
    assert!(reconciler.runtime().is_empty().await);
    assert!(repo.find_by_id(stale.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_reload_with_empty_store() -> anyhow::Result<()> {
    let repo = MockScheduleRepository::new();
    let (registry, _) = counting_registry(&["alpha"]);
    let (reconciler, _) = reconciler_with(&repo, registry);

    let report = reconciler.reload(&CancellationToken::new()).await?;
    assert_eq!(report.total(), 0);
    assert!(report.is_clean());
    Ok(())
}
