use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 持久化的定时任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: i64,
    pub name: String, // 对应任务注册表中的可执行任务
    pub description: String,
    pub cron: String,
    pub payload: serde_json::Value,
    pub status: ScheduleStatus,
    /// 运行时条目句柄，仅在签发它的进程内有效
    pub entry_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScheduleRecord {
    pub fn running(request: &ScheduleRequest, entry_id: i64) -> Self {
        let now = Utc::now();
        let start_at = request.start_at.unwrap_or(now);
        Self {
            id: 0, // 将由数据库生成
            name: request.name.clone(),
            description: request.description.clone(),
            cron: request.cron.clone(),
            payload: request.payload(start_at),
            status: ScheduleStatus::Running,
            entry_id,
            start_at,
            end_at: request.end_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// 以新的运行时句柄重新签发一条运行中记录，用于重新加载
    pub fn reissued(&self, entry_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            status: ScheduleStatus::Running,
            entry_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            ..self.clone()
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, ScheduleStatus::Running)
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_some_and(|end_at| now > end_at)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "定时任务 '{}' (ID: {}, 条目: {})",
            self.name, self.id, self.entry_id
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "stopped")]
    Stopped,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Running => "running",
            ScheduleStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ScheduleStatus::Running),
            "stopped" => Ok(ScheduleStatus::Stopped),
            _ => Err(format!("Invalid schedule status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ScheduleStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <str as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl sqlx::Type<sqlx::Sqlite> for ScheduleStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ScheduleStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ScheduleStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ScheduleStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ScheduleStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 启动定时任务的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub name: String,
    pub cron: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
}

impl ScheduleRequest {
    pub fn new(name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            start_at: None,
            end_at: None,
            description: String::new(),
        }
    }

    pub fn with_start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.end_at = Some(end_at);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 随记录保存的元数据
    pub fn payload(&self, start_at: DateTime<Utc>) -> serde_json::Value {
        json!({
            "name": self.name,
            "cron": self.cron,
            "action": "start",
            "start_at": start_at,
            "end_at": self.end_at,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub name: Option<String>,
}

impl ScheduleFilter {
    pub fn running() -> Self {
        Self {
            status: Some(ScheduleStatus::Running),
            name: None,
        }
    }

    pub fn matches(&self, record: &ScheduleRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self.name.as_deref().map_or(true, |name| record.name == name)
    }
}

/// 关联表两侧所属的分组
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupName {
    Users,
    Roles,
    Permissions,
}

impl GroupName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupName::Users => "users",
            GroupName::Roles => "roles",
            GroupName::Permissions => "permissions",
        }
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 关联关系的种类，固定了左右两侧的分组，避免分组ID写反
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RelationKind {
    UserRoles,
    RolePermissions,
}

impl RelationKind {
    pub fn left_group(&self) -> GroupName {
        match self {
            RelationKind::UserRoles => GroupName::Users,
            RelationKind::RolePermissions => GroupName::Roles,
        }
    }

    pub fn right_group(&self) -> GroupName {
        match self {
            RelationKind::UserRoles => GroupName::Roles,
            RelationKind::RolePermissions => GroupName::Permissions,
        }
    }

    pub fn groups(&self) -> (GroupName, GroupName) {
        (self.left_group(), self.right_group())
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.left_group(), self.right_group())
    }
}

/// 一条关联记录：左侧实体与右侧实体在给定关系下相连
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolAssociation {
    pub id: i64,
    pub kind: RelationKind,
    pub left_id: i64,
    pub right_id: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PoolAssociation {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// 按分组划分的命名参考值（角色、权限、类型等）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MixValue {
    pub id: i64,
    pub group_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess {
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_running_record_from_request() {
        let end_at = Utc::now() + Duration::hours(1);
        let request = ScheduleRequest::new("generate_random_string", "@every 1m")
            .with_end_at(end_at)
            .with_description("demo");
        let record = ScheduleRecord::running(&request, 3);

        assert!(record.is_running());
        assert_eq!(record.entry_id, 3);
        assert_eq!(record.end_at, Some(end_at));
        assert_eq!(record.payload["name"], "generate_random_string");
        assert_eq!(record.payload["action"], "start");
        assert!(!record.has_expired(Utc::now()));
        assert!(record.has_expired(end_at + Duration::seconds(1)));
    }

    #[test]
    fn test_reissued_record_keeps_definition() {
        let request = ScheduleRequest::new("generate_random_number", "0 * * * *");
        let mut record = ScheduleRecord::running(&request, 1);
        record.id = 42;

        let fresh = record.reissued(9);
        assert_eq!(fresh.id, 0);
        assert_eq!(fresh.entry_id, 9);
        assert_eq!(fresh.name, record.name);
        assert_eq!(fresh.cron, record.cron);
        assert_eq!(fresh.start_at, record.start_at);
    }

    #[test]
    fn test_schedule_status_parsing() {
        assert_eq!("running".parse::<ScheduleStatus>().unwrap(), ScheduleStatus::Running);
        assert_eq!("stopped".parse::<ScheduleStatus>().unwrap(), ScheduleStatus::Stopped);
        assert!("paused".parse::<ScheduleStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ScheduleStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn test_relation_kind_groups() {
        assert_eq!(
            RelationKind::UserRoles.groups(),
            (GroupName::Users, GroupName::Roles)
        );
        assert_eq!(
            RelationKind::RolePermissions.groups(),
            (GroupName::Roles, GroupName::Permissions)
        );
        assert_eq!(RelationKind::UserRoles.to_string(), "users→roles");
    }

    #[test]
    fn test_schedule_filter_matches() {
        let record = ScheduleRecord::running(&ScheduleRequest::new("a", "@hourly"), 1);
        assert!(ScheduleFilter::default().matches(&record));
        assert!(ScheduleFilter::running().matches(&record));

        let stopped = ScheduleFilter {
            status: Some(ScheduleStatus::Stopped),
            name: None,
        };
        assert!(!stopped.matches(&record));

        let other_name = ScheduleFilter {
            status: None,
            name: Some("b".to_string()),
        };
        assert!(!other_name.matches(&record));
    }
}
