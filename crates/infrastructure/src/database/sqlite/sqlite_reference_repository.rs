use async_trait::async_trait;
use keel_domain::{MixValue, ReferenceRepository};
use keel_errors::KeelResult;
use sqlx::SqlitePool;
use tracing::instrument;

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    reference_context,
};

pub struct SqliteReferenceRepository {
    pool: SqlitePool,
}

impl SqliteReferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceRepository for SqliteReferenceRepository {
    #[instrument(skip(self))]
    async fn ensure_group(&self, name: &str) -> KeelResult<i64> {
        let context = reference_context!(RepositoryOperation::Create, name);

        sqlx::query(r#"INSERT INTO "groups" (name) VALUES (?1) ON CONFLICT (name) DO NOTHING"#)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        sqlx::query_scalar(r#"SELECT id FROM "groups" WHERE name = ?1"#)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
    }

    #[instrument(skip(self))]
    async fn ensure_mix_value(&self, group: &str, name: &str) -> KeelResult<MixValue> {
        let group_id = self.ensure_group(group).await?;
        let context = reference_context!(RepositoryOperation::Create, format!("{group}/{name}"));

        sqlx::query(
            "INSERT INTO mix_values (group_id, name) VALUES (?1, ?2) ON CONFLICT (group_id, name) DO NOTHING",
        )
        .bind(group_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        sqlx::query_as::<_, MixValue>(
            "SELECT id, group_id, name FROM mix_values WHERE group_id = ?1 AND name = ?2",
        )
        .bind(group_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
    }

    #[instrument(skip(self))]
    async fn find_mix_values(&self, group: &str) -> KeelResult<Vec<MixValue>> {
        let context = reference_context!(RepositoryOperation::Query, group);

        sqlx::query_as::<_, MixValue>(
            r#"SELECT mv.id, mv.group_id, mv.name
               FROM mix_values mv
               JOIN "groups" g ON g.id = mv.group_id
               WHERE g.name = ?1
               ORDER BY mv.id"#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))
    }
}
