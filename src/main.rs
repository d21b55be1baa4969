use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keel::{wait_for_shutdown_signal, Application, ShutdownManager};
use keel_access::SeedPlan;
use keel_config::{AppConfig, LogLevel, OutputFormat};
use keel_dispatcher::builtin_registry;
use keel_domain::{ScheduleFilter, ScheduleStatus};
use keel_infrastructure::{init_logging, install_prometheus_exporter, DatabaseManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "keel", version, about = "定时任务调度与权限图解析服务")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// 日志格式: json, pretty, compact
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行迁移、恢复运行中的任务并持续运行
    Serve,
    /// 仅执行数据库迁移
    Migrate,
    /// 导入参考数据
    Seed {
        #[arg(short, long, value_name = "FILE")]
        file: String,
    },
    /// 列出可执行任务
    Jobs,
    /// 列出持久化的定时任务
    Schedules {
        #[arg(long, value_parser = parse_status)]
        status: Option<ScheduleStatus>,
    },
    /// 用户角色管理
    Roles {
        #[command(subcommand)]
        command: RoleCommands,
    },
}

#[derive(Subcommand)]
enum RoleCommands {
    /// 显示用户的角色与权限
    Show {
        #[arg(short, long)]
        user: i64,
    },
    /// 整体替换用户的角色
    Replace {
        #[arg(short, long)]
        user: i64,
        #[arg(short = 'r', long = "role-id", required = true)]
        role_ids: Vec<i64>,
    },
}

fn parse_status(value: &str) -> Result<ScheduleStatus, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Migrate => {
            let database = DatabaseManager::new(&config.database)
                .await
                .context("连接数据库失败")?;
            database.migrate().await.context("数据库迁移失败")?;
            database.close().await;
            info!("数据库迁移完成");
            Ok(())
        }
        Commands::Seed { file } => {
            let plan = SeedPlan::from_file(&file)?;
            let app = Application::new(config, builtin_registry()).await?;
            let report = app.seeder().apply(&plan).await.context("导入参考数据失败")?;
            println!("写入参考值 {} 个，新建关联 {} 条", report.values, report.links);
            app.database().close().await;
            Ok(())
        }
        Commands::Jobs => {
            for name in builtin_registry().names() {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Schedules { status } => {
            let app = Application::new(config, builtin_registry()).await?;
            let filter = ScheduleFilter { status, name: None };
            let records = app
                .reconciler()
                .list_schedules(&filter, &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            app.database().close().await;
            Ok(())
        }
        Commands::Roles { command } => {
            let app = Application::new(config, builtin_registry()).await?;
            let cancel = CancellationToken::new();
            match command {
                RoleCommands::Show { user } => {
                    let access = app.resolver().access_of(user, &cancel).await?;
                    println!("{}", serde_json::to_string_pretty(&access)?);
                }
                RoleCommands::Replace { user, role_ids } => {
                    let inserted = app
                        .resolver()
                        .replace_roles(user, &role_ids, &cancel)
                        .await?;
                    println!("用户 {user} 的角色已替换，新建关联 {inserted} 条");
                }
            }
            app.database().close().await;
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("启动Keel调度服务");

    if config.observability.metrics_enabled {
        install_prometheus_exporter(&config.observability.metrics_listen_address)?;
        info!(
            address = %config.observability.metrics_listen_address,
            "Prometheus指标端点已启动"
        );
    }

    let app = Arc::new(Application::new(config, builtin_registry()).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    let limit = std::time::Duration::from_secs(app.config().scheduler.shutdown_timeout_seconds + 5);
    let finished = shutdown_manager
        .drain(
            async {
                if let Err(e) = app_handle.await {
                    error!("应用关闭时发生错误: {e}");
                }
            },
            limit,
        )
        .await;
    if finished {
        info!("Keel调度服务已退出");
    }
    Ok(())
}
