//! Test data builders
//!
//! Builders with sensible defaults for schedule records and requests.

use chrono::{DateTime, Duration, Utc};
use keel_domain::{ScheduleRecord, ScheduleRequest, ScheduleStatus};

/// Builder for creating test ScheduleRecord entities
pub struct ScheduleRecordBuilder {
    record: ScheduleRecord,
}

impl ScheduleRecordBuilder {
    pub fn new() -> Self {
        let request = ScheduleRequest::new("test_job", "@every 1h");
        Self {
            record: ScheduleRecord::running(&request, 1),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.record.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.record.name = name.to_string();
        self
    }

    pub fn with_cron(mut self, cron: &str) -> Self {
        self.record.cron = cron.to_string();
        self
    }

    pub fn with_entry_id(mut self, entry_id: i64) -> Self {
        self.record.entry_id = entry_id;
        self
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.record.start_at = start_at;
        self
    }

    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.record.end_at = Some(end_at);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.record.description = description.to_string();
        self
    }

    pub fn stopped(mut self) -> Self {
        self.record.status = ScheduleStatus::Stopped;
        self
    }

    /// 创建时间回拨，模拟上一个进程遗留的记录
    pub fn created_ago(mut self, age: Duration) -> Self {
        self.record.created_at = Utc::now() - age;
        self.record.updated_at = self.record.created_at;
        self
    }

    pub fn build(self) -> ScheduleRecord {
        self.record
    }
}

impl Default for ScheduleRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_record_builder() {
        let record = ScheduleRecordBuilder::new()
            .with_name("generate_random_string")
            .with_cron("*/5 * * * *")
            .with_entry_id(7)
            .stopped()
            .build();

        assert_eq!(record.name, "generate_random_string");
        assert_eq!(record.cron, "*/5 * * * *");
        assert_eq!(record.entry_id, 7);
        assert!(!record.is_running());
        assert!(record.deleted_at.is_none());
    }
}
