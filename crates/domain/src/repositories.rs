//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，基础设施层提供 PostgreSQL / SQLite 实现

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_errors::KeelResult;

use crate::entities::{MixValue, RelationKind, ScheduleFilter, ScheduleRecord};

/// 定时任务记录仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 插入新记录；同名运行中记录已存在时返回 `AlreadyRunning`
    async fn create(&self, record: &ScheduleRecord) -> KeelResult<ScheduleRecord>;
    async fn find_by_id(&self, id: i64) -> KeelResult<Option<ScheduleRecord>>;
    async fn find_running(&self, name: &str) -> KeelResult<Option<ScheduleRecord>>;
    async fn list(&self, filter: &ScheduleFilter) -> KeelResult<Vec<ScheduleRecord>>;
    /// 仅当记录仍处于运行状态时才转为停止，返回是否发生了状态转换
    async fn mark_stopped(&self, id: i64, at: DateTime<Utc>) -> KeelResult<bool>;
    /// 在同一事务中删除过期记录并插入重新签发的记录
    async fn replace(&self, stale_id: i64, fresh: &ScheduleRecord) -> KeelResult<ScheduleRecord>;
    async fn delete(&self, id: i64) -> KeelResult<bool>;
}

/// 通用关联表（pools）仓储
#[async_trait]
pub trait AssociationRepository: Send + Sync {
    /// 左侧实体在给定关系下的有效关联目标
    async fn active_targets(&self, kind: RelationKind, left_id: i64) -> KeelResult<Vec<MixValue>>;
    async fn active_targets_of_many(
        &self,
        kind: RelationKind,
        left_ids: &[i64],
    ) -> KeelResult<Vec<MixValue>>;
    /// 增量关联，已存在的有效关联保持不变，返回新增条数
    async fn link(&self, kind: RelationKind, left_id: i64, right_ids: &[i64]) -> KeelResult<u64>;
    /// 全量替换：软删除现有有效关联后批量插入，整体在一个事务内完成
    async fn replace_targets(
        &self,
        kind: RelationKind,
        left_id: i64,
        right_ids: &[i64],
    ) -> KeelResult<u64>;
}

/// 分组与参考值仓储
#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    async fn ensure_group(&self, name: &str) -> KeelResult<i64>;
    async fn ensure_mix_value(&self, group: &str, name: &str) -> KeelResult<MixValue>;
    async fn find_mix_values(&self, group: &str) -> KeelResult<Vec<MixValue>>;
}
