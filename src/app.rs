use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use keel_access::{PermissionResolver, ReferenceSeeder};
use keel_config::AppConfig;
use keel_dispatcher::{CronRuntime, JobRegistry, ReloadObserver, ReloadReport, SchedulerReconciler};
use keel_infrastructure::DatabaseManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    reconciler: SchedulerReconciler,
    resolver: PermissionResolver,
}

impl Application {
    /// 连接数据库并装配调度与权限组件
    pub async fn new(config: AppConfig, registry: JobRegistry) -> Result<Self> {
        info!(jobs = registry.len(), "初始化应用程序");

        let database = DatabaseManager::connect(&config.database)
            .await
            .context("连接数据库失败")?;

        let reconciler = SchedulerReconciler::new(
            database.schedule_repository(),
            registry,
            CronRuntime::new(),
        );
        let resolver = PermissionResolver::new(database.association_repository());

        Ok(Self {
            config,
            database,
            reconciler,
            resolver,
        })
    }

    pub fn with_reload_observer(mut self, observer: Arc<dyn ReloadObserver>) -> Self {
        self.reconciler = self.reconciler.with_observer(observer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.database
    }

    pub fn reconciler(&self) -> &SchedulerReconciler {
        &self.reconciler
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub fn seeder(&self) -> ReferenceSeeder {
        ReferenceSeeder::new(
            self.database.reference_repository(),
            self.database.association_repository(),
        )
    }

    /// 按配置恢复运行中的任务并启动cron运行时
    pub async fn start_scheduler(&self, cancel: &CancellationToken) -> Result<Option<ReloadReport>> {
        if !self.config.scheduler.enabled {
            warn!("调度器已在配置中禁用");
            return Ok(None);
        }

        let report = if self.config.scheduler.reload_on_start {
            let report = self
                .reconciler
                .reload(cancel)
                .await
                .context("恢复运行中的定时任务失败")?;
            Some(report)
        } else {
            None
        };

        self.reconciler.runtime().start().await;
        Ok(report)
    }

    /// 运行直到收到关闭信号，然后在超时内停止运行时并关闭连接池
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.start_scheduler(&shutdown).await?;
        info!("应用程序已启动");

        shutdown.cancelled().await;
        info!("开始优雅关闭...");

        let limit = Duration::from_secs(self.config.scheduler.shutdown_timeout_seconds);
        if tokio::time::timeout(limit, self.reconciler.shutdown())
            .await
            .is_err()
        {
            warn!("停止cron运行时超时");
        }
        self.database.close().await;

        info!("应用程序已停止");
        Ok(())
    }
}
