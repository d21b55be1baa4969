//! Shared row mapping helpers
//!
//! PostgreSQL stores the schedule payload as JSONB while SQLite keeps it as
//! TEXT; everything else maps one to one.

use keel_domain::ScheduleRecord;
use keel_errors::{KeelError, KeelResult};
use sqlx::Row;

pub(crate) const SCHEDULE_COLUMNS: &str = "id, name, description, cron, payload, status, entry_id, start_at, end_at, created_at, updated_at, deleted_at";

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn parse_payload_sqlite(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> KeelResult<serde_json::Value> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| KeelError::Serialization(format!("解析任务负载失败: {e}")))
    }

    pub fn schedule_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> KeelResult<ScheduleRecord> {
        Ok(ScheduleRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            cron: row.try_get("cron")?,
            payload: Self::parse_payload_sqlite(row, "payload")?,
            status: row.try_get("status")?,
            entry_id: row.try_get("entry_id")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    pub fn schedule_from_postgres(row: &sqlx::postgres::PgRow) -> KeelResult<ScheduleRecord> {
        Ok(ScheduleRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            cron: row.try_get("cron")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            entry_id: row.try_get("entry_id")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}
