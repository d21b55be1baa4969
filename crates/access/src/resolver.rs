use std::collections::BTreeSet;
use std::sync::Arc;

use keel_domain::{
    cancellable, AssociationRepository, CancellationToken, MixValue, RelationKind, UserAccess,
};
use keel_errors::{KeelError, KeelResult};
use keel_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::{debug, instrument};

/// 通过关联表解析用户的角色与权限
#[derive(Clone)]
pub struct PermissionResolver {
    associations: Arc<dyn AssociationRepository>,
    metrics: Arc<MetricsCollector>,
}

impl PermissionResolver {
    pub fn new(associations: Arc<dyn AssociationRepository>) -> Self {
        Self {
            associations,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// 用户当前有效的角色名称
    #[instrument(skip(self, cancel))]
    pub async fn roles_of(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> KeelResult<BTreeSet<String>> {
        let roles = self.role_values(user_id, cancel).await?;
        Ok(names(roles))
    }

    /// 用户经由其角色获得的权限名称，两跳都排除已删除的关联
    #[instrument(skip(self, cancel))]
    pub async fn permissions_of(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> KeelResult<BTreeSet<String>> {
        let roles = self.role_values(user_id, cancel).await?;
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }

        let role_ids: Vec<i64> = roles.iter().map(|role| role.id).collect();
        let permissions = cancellable(
            cancel,
            self.associations
                .active_targets_of_many(RelationKind::RolePermissions, &role_ids),
        )
        .await?;
        debug!(
            user_id = user_id,
            roles = role_ids.len(),
            permissions = permissions.len(),
            "解析用户权限"
        );
        Ok(names(permissions))
    }

    /// 同时解析角色与权限
    pub async fn access_of(&self, user_id: i64, cancel: &CancellationToken) -> KeelResult<UserAccess> {
        let (roles, permissions) = tokio::try_join!(
            self.roles_of(user_id, cancel),
            self.permissions_of(user_id, cancel)
        )?;
        Ok(UserAccess { roles, permissions })
    }

    /// 以给定角色整体替换用户当前的角色，返回新写入的关联数
    ///
    /// 重复的ID会被合并；任一ID不属于角色分组时整体失败，原有关联保持不变。
    #[instrument(skip(self, role_ids, cancel), fields(role_count = role_ids.len()))]
    pub async fn replace_roles(
        &self,
        user_id: i64,
        role_ids: &[i64],
        cancel: &CancellationToken,
    ) -> KeelResult<u64> {
        if role_ids.is_empty() {
            return Err(KeelError::EmptyRoleSet { user_id });
        }
        let unique: Vec<i64> = role_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let inserted = cancellable(
            cancel,
            self.associations
                .replace_targets(RelationKind::UserRoles, user_id, &unique),
        )
        .await?;

        StructuredLogger::log_roles_replaced(user_id, unique.len());
        self.metrics.record_role_replacement();
        Ok(inserted)
    }

    async fn role_values(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> KeelResult<Vec<MixValue>> {
        cancellable(
            cancel,
            self.associations
                .active_targets(RelationKind::UserRoles, user_id),
        )
        .await
    }
}

fn names(values: Vec<MixValue>) -> BTreeSet<String> {
    values.into_iter().map(|value| value.name).collect()
}
