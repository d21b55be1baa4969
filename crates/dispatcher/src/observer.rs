use std::fmt;

use keel_domain::ScheduleRecord;
use keel_infrastructure::StructuredLogger;

/// 重新加载时记录被丢弃的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// 任务名称不在注册表中
    UnknownJob,
    /// 表达式无法被运行时接受
    InvalidCron(String),
    /// 同名任务已有一条记录被恢复
    Duplicate,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::UnknownJob => "unknown_job",
            DropReason::InvalidCron(_) => "invalid_cron",
            DropReason::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownJob => write!(f, "未知的任务名称"),
            DropReason::InvalidCron(message) => write!(f, "无效的CRON表达式: {message}"),
            DropReason::Duplicate => write!(f, "重复的运行中任务"),
        }
    }
}

/// 重新加载过程的回调
///
/// 丢弃和失败的记录都会经过这里，调用方可以据此告警或审计。
pub trait ReloadObserver: Send + Sync {
    fn on_dropped(&self, record: &ScheduleRecord, reason: &DropReason);

    fn on_failed(&self, _record: &ScheduleRecord, _error: &str) {}

    fn on_reinstated(&self, _stale: &ScheduleRecord, _fresh: &ScheduleRecord) {}
}

/// 默认实现：写入结构化日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReloadObserver;

impl ReloadObserver for LoggingReloadObserver {
    fn on_dropped(&self, record: &ScheduleRecord, reason: &DropReason) {
        StructuredLogger::log_reload_dropped(&record.name, record.id, &reason.to_string());
    }

    fn on_failed(&self, record: &ScheduleRecord, error: &str) {
        StructuredLogger::log_reload_failed(&record.name, record.id, error);
    }
}
