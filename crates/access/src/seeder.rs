//! 参考数据初始化
//!
//! 种子文件描述分组、角色及其权限，以及用户与角色的初始关联，例如：
//!
//! ```toml
//! [[roles]]
//! name = "admin"
//! permissions = ["task:read", "task:write"]
//!
//! [[users]]
//! name = "alice"
//! roles = ["admin"]
//!
//! [[groups]]
//! name = "task_types"
//! values = ["shell", "http"]
//! ```
//!
//! 重复执行同一个种子文件不会产生重复数据。

use std::path::Path;
use std::sync::Arc;

use keel_domain::{
    AssociationRepository, GroupName, ReferenceRepository, RelationKind,
};
use keel_errors::{KeelError, KeelResult};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedPlan {
    #[serde(default)]
    pub groups: Vec<ValueGroupSeed>,
    #[serde(default)]
    pub roles: Vec<RoleSeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

/// 任意分组及其取值
#[derive(Debug, Clone, Deserialize)]
pub struct ValueGroupSeed {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleSeed {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SeedPlan {
    pub fn from_toml(content: &str) -> KeelResult<Self> {
        toml::from_str(content)
            .map_err(|e| KeelError::Serialization(format!("解析种子文件失败: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> KeelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeelError::config_error(format!("读取种子文件 {} 失败: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub values: usize,
    pub links: u64,
}

pub struct ReferenceSeeder {
    references: Arc<dyn ReferenceRepository>,
    associations: Arc<dyn AssociationRepository>,
}

impl ReferenceSeeder {
    pub fn new(
        references: Arc<dyn ReferenceRepository>,
        associations: Arc<dyn AssociationRepository>,
    ) -> Self {
        Self {
            references,
            associations,
        }
    }

    pub async fn apply(&self, plan: &SeedPlan) -> KeelResult<SeedReport> {
        let mut report = SeedReport::default();

        for group in &plan.groups {
            self.references.ensure_group(&group.name).await?;
            for value in &group.values {
                self.references.ensure_mix_value(&group.name, value).await?;
                report.values += 1;
            }
        }

        for role in &plan.roles {
            let role_value = self
                .references
                .ensure_mix_value(GroupName::Roles.as_str(), &role.name)
                .await?;
            report.values += 1;

            let mut permission_ids = Vec::with_capacity(role.permissions.len());
            for permission in &role.permissions {
                let value = self
                    .references
                    .ensure_mix_value(GroupName::Permissions.as_str(), permission)
                    .await?;
                permission_ids.push(value.id);
                report.values += 1;
            }
            if !permission_ids.is_empty() {
                report.links += self
                    .associations
                    .link(RelationKind::RolePermissions, role_value.id, &permission_ids)
                    .await?;
            }
        }

        for user in &plan.users {
            let user_value = self
                .references
                .ensure_mix_value(GroupName::Users.as_str(), &user.name)
                .await?;
            report.values += 1;

            let mut role_ids = Vec::with_capacity(user.roles.len());
            for role in &user.roles {
                let value = self
                    .references
                    .ensure_mix_value(GroupName::Roles.as_str(), role)
                    .await?;
                role_ids.push(value.id);
            }
            if !role_ids.is_empty() {
                report.links += self
                    .associations
                    .link(RelationKind::UserRoles, user_value.id, &role_ids)
                    .await?;
            }
        }

        info!(values = report.values, links = report.links, "参考数据初始化完成");
        Ok(report)
    }
}
