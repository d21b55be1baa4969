//! Structured logging utilities
//!
//! One associated function per domain event so that every occurrence of an
//! event carries the same field names.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_schedule_started(name: &str, cron: &str, entry_id: i64, record_id: i64) {
        info!(
            event = "schedule_started",
            schedule.name = name,
            schedule.cron = cron,
            schedule.id = record_id,
            entry_id = entry_id,
            "定时任务已启动"
        );
    }

    pub fn log_schedule_stopped(name: &str, entry_id: i64, record_id: i64) {
        info!(
            event = "schedule_stopped",
            schedule.name = name,
            schedule.id = record_id,
            entry_id = entry_id,
            "定时任务已停止"
        );
    }

    pub fn log_schedule_expired(name: &str, entry_id: i64, end_at: DateTime<Utc>) {
        info!(
            event = "schedule_expired",
            schedule.name = name,
            schedule.end_at = %end_at,
            entry_id = entry_id,
            "定时任务已到结束时间，自动停止"
        );
    }

    pub fn log_reload_summary(reinstated: usize, dropped: usize, failed: usize) {
        info!(
            event = "schedules_reloaded",
            reload.reinstated = reinstated,
            reload.dropped = dropped,
            reload.failed = failed,
            "定时任务重新加载完成"
        );
    }

    pub fn log_reload_dropped(name: &str, record_id: i64, reason: &str) {
        warn!(
            event = "schedule_dropped",
            schedule.name = name,
            schedule.id = record_id,
            reason = reason,
            "重新加载时丢弃定时任务记录"
        );
    }

    pub fn log_reload_failed(name: &str, record_id: i64, error: &str) {
        warn!(
            event = "schedule_reload_failed",
            schedule.name = name,
            schedule.id = record_id,
            error = error,
            "重新加载定时任务失败，保留原记录"
        );
    }

    pub fn log_roles_replaced(user_id: i64, role_count: usize) {
        info!(
            event = "roles_replaced",
            user_id = user_id,
            roles.count = role_count,
            "用户角色已替换"
        );
    }
}
