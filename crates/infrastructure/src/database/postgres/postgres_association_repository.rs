use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use keel_domain::{AssociationRepository, GroupName, MixValue, RelationKind};
use keel_errors::{KeelError, KeelResult};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::{
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    pool_context,
};

const TARGETS_SQL: &str = r#"
    SELECT DISTINCT mv.id, mv.group_id, mv.name
    FROM pools p
    JOIN "groups" g1 ON g1.id = p.group1_id
    JOIN "groups" g2 ON g2.id = p.group2_id
    JOIN mix_values mv ON mv.id = p.mv2_id
    WHERE g1.name = "#;

pub struct PostgresAssociationRepository {
    pool: PgPool,
}

impl PostgresAssociationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn group_id(
        conn: &mut PgConnection,
        group: GroupName,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(r#"SELECT id FROM "groups" WHERE name = $1"#)
            .bind(group.as_str())
            .fetch_optional(conn)
            .await
    }

    async fn resolve_groups(
        conn: &mut PgConnection,
        kind: RelationKind,
    ) -> KeelResult<(i64, i64)> {
        let left = Self::group_id(&mut *conn, kind.left_group())
            .await?
            .ok_or_else(|| KeelError::not_found(format!("分组 {}", kind.left_group())))?;
        let right = Self::group_id(&mut *conn, kind.right_group())
            .await?
            .ok_or_else(|| KeelError::not_found(format!("分组 {}", kind.right_group())))?;
        Ok((left, right))
    }

    /// 校验右侧ID全部属于目标分组
    async fn ensure_targets_exist(
        conn: &mut PgConnection,
        kind: RelationKind,
        right_group_id: i64,
        right_ids: &[i64],
    ) -> KeelResult<()> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id FROM mix_values WHERE group_id = ");
        builder.push_bind(right_group_id).push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in right_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let found: Vec<i64> = builder.build_query_scalar().fetch_all(&mut *conn).await?;
        let found: BTreeSet<i64> = found.into_iter().collect();
        let missing: Vec<i64> = right_ids
            .iter()
            .copied()
            .filter(|id| !found.contains(id))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(KeelError::invalid_input(format!(
                "{} 中不存在的ID: {:?}",
                kind.right_group(),
                missing
            )))
        }
    }

    async fn insert_links(
        conn: &mut PgConnection,
        groups: (i64, i64),
        left_id: i64,
        right_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if right_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO pools (group1_id, group2_id, mv1_id, mv2_id, created_at, updated_at) ",
        );
        builder.push_values(right_ids, |mut row, right_id| {
            row.push_bind(groups.0)
                .push_bind(groups.1)
                .push_bind(left_id)
                .push_bind(*right_id)
                .push_bind(now)
                .push_bind(now);
        });
        builder.push(" ON CONFLICT DO NOTHING");

        let result = builder.build().execute(conn).await?;
        Ok(result.rows_affected())
    }

    fn dedup(ids: &[i64]) -> Vec<i64> {
        ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }
}

#[async_trait]
impl AssociationRepository for PostgresAssociationRepository {
    #[instrument(skip(self), fields(relation = %kind, left_id = left_id))]
    async fn active_targets(&self, kind: RelationKind, left_id: i64) -> KeelResult<Vec<MixValue>> {
        self.active_targets_of_many(kind, &[left_id]).await
    }

    #[instrument(skip(self), fields(relation = %kind, count = left_ids.len()))]
    async fn active_targets_of_many(
        &self,
        kind: RelationKind,
        left_ids: &[i64],
    ) -> KeelResult<Vec<MixValue>> {
        if left_ids.is_empty() {
            return Ok(Vec::new());
        }
        let context = pool_context!(RepositoryOperation::Query, kind);

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(TARGETS_SQL);
        builder
            .push_bind(kind.left_group().as_str())
            .push(" AND g2.name = ")
            .push_bind(kind.right_group().as_str())
            .push(" AND p.deleted_at IS NULL AND p.mv1_id IN (");
        let mut separated = builder.separated(", ");
        for id in left_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY mv.name");

        let values = builder
            .build_query_as::<MixValue>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        debug!("查询到 {} 个关联目标 ({})", values.len(), kind);
        Ok(values)
    }

    #[instrument(skip(self, right_ids), fields(relation = %kind, left_id = left_id))]
    async fn link(&self, kind: RelationKind, left_id: i64, right_ids: &[i64]) -> KeelResult<u64> {
        let context = pool_context!(RepositoryOperation::Create, kind);
        let right_ids = Self::dedup(right_ids);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let groups = Self::resolve_groups(&mut *tx, kind).await?;
        if !right_ids.is_empty() {
            Self::ensure_targets_exist(&mut *tx, kind, groups.1, &right_ids).await?;
        }
        let inserted = Self::insert_links(&mut *tx, groups, left_id, &right_ids)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;
        Ok(inserted)
    }

    #[instrument(skip(self, right_ids), fields(relation = %kind, left_id = left_id))]
    async fn replace_targets(
        &self,
        kind: RelationKind,
        left_id: i64,
        right_ids: &[i64],
    ) -> KeelResult<u64> {
        let context = pool_context!(RepositoryOperation::Replace, kind);
        let right_ids = Self::dedup(right_ids);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let groups = Self::resolve_groups(&mut *tx, kind).await?;
        if !right_ids.is_empty() {
            Self::ensure_targets_exist(&mut *tx, kind, groups.1, &right_ids).await?;
        }

        let now = Utc::now();
        let removed = sqlx::query(
            "UPDATE pools SET deleted_at = $1, updated_at = $1
             WHERE group1_id = $2 AND group2_id = $3 AND mv1_id = $4 AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(groups.0)
        .bind(groups.1)
        .bind(left_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        let inserted = Self::insert_links(&mut *tx, groups, left_id, &right_ids)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error(&context, e))?;

        RepositoryErrorHelpers::log_operation_success(
            &context,
            Some(&format!(
                "左侧 {}: 移除 {} 条, 新增 {} 条",
                left_id,
                removed.rows_affected(),
                inserted
            )),
        );
        Ok(inserted)
    }
}
