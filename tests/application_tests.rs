use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use keel::{Application, ShutdownManager};
use keel_access::SeedPlan;
use keel_config::{AppConfig, DatabaseConfig};
use keel_dispatcher::{builtin_registry, DropReason, EntryId};
use keel_domain::{
    CancellationToken, ReferenceRepository, ScheduleFilter, ScheduleRecord, ScheduleRepository,
    ScheduleRequest,
};
use keel_testing_utils::{RecordingReloadObserver, TestEnv};

fn file_config(dir: &Path) -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: format!("sqlite:{}", dir.join("keel.db").display()),
            max_connections: 1,
            min_connections: 1,
            ..DatabaseConfig::default()
        },
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_restart_reinstates_known_jobs_and_drops_unknown() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cancel = CancellationToken::new();

    let original = {
        let app = Application::new(file_config(dir.path()), builtin_registry()).await?;
        let started = app
            .reconciler()
            .start(
                ScheduleRequest::new("generate_random_string", "@every 1h"),
                &cancel,
            )
            .await?;
        // 已下线任务遗留的运行中记录
        app.database()
            .schedule_repository()
            .create(&ScheduleRecord::running(
                &ScheduleRequest::new("retired_job", "@daily"),
                99,
            ))
            .await?;
        app.reconciler().shutdown().await;
        app.database().close().await;
        started
    };

    let observer = RecordingReloadObserver::new();
    let app = Application::new(file_config(dir.path()), builtin_registry())
        .await?
        .with_reload_observer(Arc::new(observer.clone()));
    let report = app.start_scheduler(&cancel).await?.expect("reload report");

    assert_eq!(report.reinstated.len(), 1);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(
        observer.dropped(),
        vec![("retired_job".to_string(), DropReason::UnknownJob)]
    );

    let running = app
        .reconciler()
        .list_schedules(&ScheduleFilter::running(), &cancel)
        .await?;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].name, "generate_random_string");
    assert_ne!(running[0].id, original.id);

    let entry_id = EntryId::from_i64(running[0].entry_id).expect("non-zero entry id");
    assert!(app.reconciler().runtime().contains(entry_id).await);
    assert!(app.reconciler().runtime().is_running().await);

    app.reconciler().shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = Arc::new(Application::new(file_config(dir.path()), builtin_registry()).await?);
    let manager = ShutdownManager::new();

    let handle = {
        let app = Arc::clone(&app);
        let shutdown = manager.subscribe();
        tokio::spawn(async move { app.run(shutdown).await })
    };

    let probe = Arc::clone(&app);
    let started = TestEnv::wait_for(
        || {
            let probe = Arc::clone(&probe);
            async move { probe.reconciler().runtime().is_running().await }
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(started);

    app.reconciler()
        .start(
            ScheduleRequest::new("generate_random_number", "@every 1h"),
            &CancellationToken::new(),
        )
        .await?;

    manager.shutdown();
    handle.await??;

    assert!(!app.reconciler().runtime().is_running().await);
    assert!(app.reconciler().runtime().is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_disabled_scheduler_does_not_start_runtime() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = file_config(dir.path());
    config.scheduler.enabled = false;
    let app = Application::new(config, builtin_registry()).await?;

    let report = app.start_scheduler(&CancellationToken::new()).await?;
    assert!(report.is_none());
    assert!(!app.reconciler().runtime().is_running().await);
    Ok(())
}

#[tokio::test]
async fn test_sample_seed_file_grants_admin_access() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = Application::new(file_config(dir.path()), builtin_registry()).await?;
    let seed = Path::new(env!("CARGO_MANIFEST_DIR")).join("seeds/reference.toml");
    let plan = SeedPlan::from_file(&seed)?;

    app.seeder().apply(&plan).await?;

    let admin = app
        .database()
        .reference_repository()
        .ensure_mix_value("users", "admin")
        .await?;
    let access = app
        .resolver()
        .access_of(admin.id, &CancellationToken::new())
        .await?;

    let expected: BTreeSet<String> = ["role:write", "schedule:read", "schedule:write"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(access.permissions, expected);
    assert!(access.roles.contains("admin"));
    Ok(())
}

#[test]
fn test_sample_config_parses() -> Result<()> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/keel.toml");
    let config = AppConfig::load(path.to_str())?;
    assert_eq!(config.database.url, "sqlite:keel.db");
    assert!(config.scheduler.reload_on_start);
    Ok(())
}
