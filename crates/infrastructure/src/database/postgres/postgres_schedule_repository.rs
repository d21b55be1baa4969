use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_domain::{ScheduleFilter, ScheduleRecord, ScheduleRepository, ScheduleStatus};
use keel_errors::{KeelError, KeelResult};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::{
    database::mapping::{MappingHelpers, SCHEDULE_COLUMNS},
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    schedule_context,
};

pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn insert_sql() -> String {
        format!(
            "INSERT INTO schedulers (name, description, cron, payload, status, entry_id, start_at, end_at, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL)
             RETURNING {SCHEDULE_COLUMNS}"
        )
    }

    fn insert_query<'q>(
        sql: &'q str,
        record: &'q ScheduleRecord,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        sqlx::query(sql)
            .bind(&record.name)
            .bind(&record.description)
            .bind(&record.cron)
            .bind(&record.payload)
            .bind(ScheduleStatus::Running)
            .bind(record.entry_id)
            .bind(record.start_at)
            .bind(record.end_at)
            .bind(record.created_at)
            .bind(record.updated_at)
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    #[instrument(skip(self, record), fields(
        schedule.name = %record.name,
        entry_id = record.entry_id,
    ))]
    async fn create(&self, record: &ScheduleRecord) -> KeelResult<ScheduleRecord> {
        let context = schedule_context!(RepositoryOperation::Create, &record.name);
        let sql = Self::insert_sql();

        let row = Self::insert_query(&sql, record)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if RepositoryErrorHelpers::is_unique_violation(&e) {
                    KeelError::already_running(&record.name)
                } else {
                    RepositoryErrorHelpers::database_error(&context, e)
                }
            })?;

        let created = MappingHelpers::schedule_from_postgres(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context,
            Some(&format!("ID: {}, 条目: {}", created.id, created.entry_id)),
        );
        Ok(created)
    }

    #[instrument(skip(self), fields(schedule.id = id))]
    async fn find_by_id(&self, id: i64) -> KeelResult<Option<ScheduleRecord>> {
        let context = schedule_context!(RepositoryOperation::Read, id);
        let sql =
            format!("SELECT {SCHEDULE_COLUMNS} FROM schedulers WHERE id = $1 AND deleted_at IS NULL");

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        row.as_ref()
            .map(MappingHelpers::schedule_from_postgres)
            .transpose()
    }

    #[instrument(skip(self), fields(schedule.name = %name))]
    async fn find_running(&self, name: &str) -> KeelResult<Option<ScheduleRecord>> {
        let context = schedule_context!(RepositoryOperation::Read, name);
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedulers
             WHERE name = $1 AND status = 'running' AND deleted_at IS NULL
             ORDER BY id LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        match row {
            Some(row) => {
                let record = MappingHelpers::schedule_from_postgres(&row)?;
                debug!("查询运行中任务成功: {}", record.entity_description());
                Ok(Some(record))
            }
            None => {
                debug!("没有运行中的任务: {}", name);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &ScheduleFilter) -> KeelResult<Vec<ScheduleRecord>> {
        let context = schedule_context!(RepositoryOperation::Query);

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedulers WHERE deleted_at IS NULL"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(name) = &filter.name {
            builder.push(" AND name = ").push_bind(name);
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        rows.iter()
            .map(MappingHelpers::schedule_from_postgres)
            .collect()
    }

    #[instrument(skip(self), fields(schedule.id = id))]
    async fn mark_stopped(&self, id: i64, at: DateTime<Utc>) -> KeelResult<bool> {
        let context = schedule_context!(RepositoryOperation::Update, id);

        let result = sqlx::query(
            "UPDATE schedulers SET status = 'stopped', updated_at = $2
             WHERE id = $1 AND status = 'running' AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, fresh), fields(
        schedule.name = %fresh.name,
        stale_id = stale_id,
        entry_id = fresh.entry_id,
    ))]
    async fn replace(&self, stale_id: i64, fresh: &ScheduleRecord) -> KeelResult<ScheduleRecord> {
        let context = schedule_context!(RepositoryOperation::Replace, &fresh.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let deleted = sqlx::query("DELETE FROM schedulers WHERE id = $1")
            .bind(stale_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;
        if deleted.rows_affected() == 0 {
            return Err(KeelError::not_found(format!("定时任务记录 {stale_id}")));
        }

        let sql = Self::insert_sql();
        let row = Self::insert_query(&sql, fresh)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;
        let inserted = MappingHelpers::schedule_from_postgres(&row)?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        RepositoryErrorHelpers::log_operation_success(
            &context,
            Some(&format!("{} -> {}", stale_id, inserted.id)),
        );
        Ok(inserted)
    }

    #[instrument(skip(self), fields(schedule.id = id))]
    async fn delete(&self, id: i64) -> KeelResult<bool> {
        let context = schedule_context!(RepositoryOperation::Delete, id);

        let result = sqlx::query("DELETE FROM schedulers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        Ok(result.rows_affected() > 0)
    }
}
