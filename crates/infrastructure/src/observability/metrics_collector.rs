//! 指标采集
//!
//! 未安装全局 recorder 时所有记录操作都是空操作。

use metrics::{counter, histogram, Counter, Histogram};
use tracing::debug;

pub struct MetricsCollector {
    schedules_started_total: Counter,
    role_replacements_total: Counter,
    reload_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            schedules_started_total: counter!("keel_schedules_started_total"),
            role_replacements_total: counter!("keel_role_replacements_total"),
            reload_duration: histogram!("keel_reload_duration_seconds"),
        }
    }

    pub fn record_schedule_started(&self) {
        self.schedules_started_total.increment(1);
    }

    /// `reason` 取值: `manual`、`expired`
    pub fn record_schedule_stopped(&self, reason: &'static str) {
        counter!("keel_schedules_stopped_total", "reason" => reason).increment(1);
    }

    /// `outcome` 取值: `reinstated`、`dropped`、`failed`
    pub fn record_reload_record(&self, outcome: &'static str) {
        counter!("keel_reload_records_total", "outcome" => outcome).increment(1);
    }

    pub fn record_reload_duration(&self, duration_seconds: f64) {
        self.reload_duration.record(duration_seconds);
        debug!(duration_seconds = duration_seconds, "记录重新加载耗时");
    }

    pub fn record_job_run(&self, job: &str, duration_seconds: f64) {
        counter!("keel_job_runs_total", "job" => job.to_string()).increment(1);
        histogram!("keel_job_run_duration_seconds", "job" => job.to_string())
            .record(duration_seconds);
    }

    pub fn record_role_replacement(&self) {
        self.role_replacements_total.increment(1);
    }
}
