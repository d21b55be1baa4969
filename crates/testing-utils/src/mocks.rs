//! Mock implementations of the repository traits
//!
//! In-memory stand-ins that follow the same rules as the SQL repositories
//! (unique running name, conditional stop, soft-deleted links) and expose
//! switches for injecting failures and delays.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_dispatcher::{DropReason, ReloadObserver};
use keel_domain::{
    AssociationRepository, GroupName, MixValue, ReferenceRepository, RelationKind,
    ScheduleFilter, ScheduleRecord, ScheduleRepository, ScheduleStatus,
};
use keel_errors::{KeelError, KeelResult};

#[derive(Debug, Default)]
struct ScheduleFailures {
    fail_next_create: bool,
    fail_next_stop: bool,
    fail_replace_names: HashSet<String>,
    fail_delete: bool,
    create_delay: Option<Duration>,
}

/// Mock implementation of ScheduleRepository for testing
#[derive(Debug, Clone)]
pub struct MockScheduleRepository {
    records: Arc<Mutex<BTreeMap<i64, ScheduleRecord>>>,
    next_id: Arc<Mutex<i64>>,
    failures: Arc<Mutex<ScheduleFailures>>,
}

impl Default for MockScheduleRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScheduleRepository {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            failures: Arc::new(Mutex::new(ScheduleFailures::default())),
        }
    }

    /// 直接写入记录，绕过唯一性检查，用于构造历史脏数据
    pub fn insert_raw(&self, record: ScheduleRecord) -> ScheduleRecord {
        let mut next_id = self.next_id.lock().unwrap();
        let mut stored = record;
        stored.id = *next_id;
        *next_id += 1;
        self.records
            .lock()
            .unwrap()
            .insert(stored.id, stored.clone());
        stored
    }

    pub fn all(&self) -> Vec<ScheduleRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn running(&self, name: &str) -> Vec<ScheduleRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.name == name && r.is_running() && r.deleted_at.is_none())
            .cloned()
            .collect()
    }

    pub fn fail_next_create(&self) {
        self.failures.lock().unwrap().fail_next_create = true;
    }

    pub fn fail_next_stop(&self) {
        self.failures.lock().unwrap().fail_next_stop = true;
    }

    pub fn fail_replace_for(&self, name: &str) {
        self.failures
            .lock()
            .unwrap()
            .fail_replace_names
            .insert(name.to_string());
    }

    pub fn fail_deletes(&self) {
        self.failures.lock().unwrap().fail_delete = true;
    }

    /// 在写入前等待，用于测试取消
    pub fn set_create_delay(&self, delay: Duration) {
        self.failures.lock().unwrap().create_delay = Some(delay);
    }

    fn insert_checked(&self, record: &ScheduleRecord) -> KeelResult<ScheduleRecord> {
        let mut records = self.records.lock().unwrap();
        let duplicate = records
            .values()
            .any(|r| r.name == record.name && r.is_running() && r.deleted_at.is_none());
        if record.is_running() && duplicate {
            return Err(KeelError::already_running(&record.name));
        }

        let mut next_id = self.next_id.lock().unwrap();
        let mut stored = record.clone();
        stored.id = *next_id;
        *next_id += 1;
        records.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ScheduleRepository for MockScheduleRepository {
    async fn create(&self, record: &ScheduleRecord) -> KeelResult<ScheduleRecord> {
        let delay = self.failures.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut failures = self.failures.lock().unwrap();
            if failures.fail_next_create {
                failures.fail_next_create = false;
                return Err(KeelError::persistence("模拟的写入失败"));
            }
        }
        self.insert_checked(record)
    }

    async fn find_by_id(&self, id: i64) -> KeelResult<Option<ScheduleRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .cloned())
    }

    async fn find_running(&self, name: &str) -> KeelResult<Option<ScheduleRecord>> {
        Ok(self.running(name).into_iter().next())
    }

    async fn list(&self, filter: &ScheduleFilter) -> KeelResult<Vec<ScheduleRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.deleted_at.is_none() && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn mark_stopped(&self, id: i64, at: DateTime<Utc>) -> KeelResult<bool> {
        {
            let mut failures = self.failures.lock().unwrap();
            if failures.fail_next_stop {
                failures.fail_next_stop = false;
                return Err(KeelError::persistence("模拟的更新失败"));
            }
        }
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if record.is_running() && record.deleted_at.is_none() => {
                record.status = ScheduleStatus::Stopped;
                record.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace(&self, stale_id: i64, fresh: &ScheduleRecord) -> KeelResult<ScheduleRecord> {
        if self
            .failures
            .lock()
            .unwrap()
            .fail_replace_names
            .contains(&fresh.name)
        {
            return Err(KeelError::persistence("模拟的替换失败"));
        }

        let stale = self
            .records
            .lock()
            .unwrap()
            .remove(&stale_id)
            .ok_or_else(|| KeelError::not_found(format!("定时任务记录 {stale_id}")))?;

        match self.insert_checked(fresh) {
            Ok(inserted) => Ok(inserted),
            Err(e) => {
                // 回滚
                self.records.lock().unwrap().insert(stale.id, stale);
                Err(e)
            }
        }
    }

    async fn delete(&self, id: i64) -> KeelResult<bool> {
        if self.failures.lock().unwrap().fail_delete {
            return Err(KeelError::persistence("模拟的删除失败"));
        }
        Ok(self.records.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Debug, Clone)]
struct PoolRow {
    id: i64,
    group1_id: i64,
    group2_id: i64,
    mv1_id: i64,
    mv2_id: i64,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    groups: BTreeMap<String, i64>,
    mix_values: Vec<MixValue>,
    pools: Vec<PoolRow>,
    next_id: i64,
}

impl GraphState {
    fn with_core_groups() -> Self {
        let mut state = GraphState {
            next_id: 1,
            ..GraphState::default()
        };
        for group in [GroupName::Users, GroupName::Roles, GroupName::Permissions] {
            state.ensure_group(group.as_str());
        }
        state
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_group(&mut self, name: &str) -> i64 {
        if let Some(id) = self.groups.get(name) {
            return *id;
        }
        let id = self.allocate_id();
        self.groups.insert(name.to_string(), id);
        id
    }

    fn group_ids(&self, kind: RelationKind) -> KeelResult<(i64, i64)> {
        let lookup = |group: GroupName| {
            self.groups
                .get(group.as_str())
                .copied()
                .ok_or_else(|| KeelError::not_found(format!("分组 {group}")))
        };
        Ok((lookup(kind.left_group())?, lookup(kind.right_group())?))
    }

    fn active_targets(&self, kind: RelationKind, left_ids: &[i64]) -> Vec<MixValue> {
        let Ok((group1, group2)) = self.group_ids(kind) else {
            return Vec::new();
        };
        let target_ids: BTreeSet<i64> = self
            .pools
            .iter()
            .filter(|p| {
                p.deleted_at.is_none()
                    && p.group1_id == group1
                    && p.group2_id == group2
                    && left_ids.contains(&p.mv1_id)
            })
            .map(|p| p.mv2_id)
            .collect();
        let mut values: Vec<MixValue> = self
            .mix_values
            .iter()
            .filter(|mv| target_ids.contains(&mv.id))
            .cloned()
            .collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        values
    }

    fn ensure_targets_exist(&self, kind: RelationKind, group_id: i64, ids: &[i64]) -> KeelResult<()> {
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| {
                !self
                    .mix_values
                    .iter()
                    .any(|mv| mv.id == *id && mv.group_id == group_id)
            })
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

    fn insert_links(&mut self, groups: (i64, i64), left_id: i64, right_ids: &[i64]) -> u64 {
        let mut inserted = 0;
        for right_id in right_ids {
            let exists = self.pools.iter().any(|p| {
                p.deleted_at.is_none()
                    && p.group1_id == groups.0
                    && p.group2_id == groups.1
                    && p.mv1_id == left_id
                    && p.mv2_id == *right_id
            });
            if !exists {
                let id = self.allocate_id();
                self.pools.push(PoolRow {
                    id,
                    group1_id: groups.0,
                    group2_id: groups.1,
                    mv1_id: left_id,
                    mv2_id: *right_id,
                    deleted_at: None,
                });
                inserted += 1;
            }
        }
        inserted
    }
}

#[derive(Debug, Default)]
struct GraphFailures {
    fail_next_replace: bool,
    query_delay: Option<Duration>,
}

/// 关联图的内存实现，同时实现关联仓储与参考值仓储
#[derive(Debug, Clone)]
pub struct MockAssociationRepository {
    state: Arc<Mutex<GraphState>>,
    failures: Arc<Mutex<GraphFailures>>,
}

impl Default for MockAssociationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAssociationRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GraphState::with_core_groups())),
            failures: Arc::new(Mutex::new(GraphFailures::default())),
        }
    }

    /// 在指定分组中创建参考值
    pub fn add_value(&self, group: &str, name: &str) -> MixValue {
        let mut state = self.state.lock().unwrap();
        let group_id = state.ensure_group(group);
        if let Some(existing) = state
            .mix_values
            .iter()
            .find(|mv| mv.group_id == group_id && mv.name == name)
        {
            return existing.clone();
        }
        let value = MixValue {
            id: state.allocate_id(),
            group_id,
            name: name.to_string(),
        };
        state.mix_values.push(value.clone());
        value
    }

    /// 直接写入一条关联，`deleted` 为真时写入已软删除的记录
    pub fn add_link(&self, kind: RelationKind, left_id: i64, right_id: i64, deleted: bool) {
        let mut state = self.state.lock().unwrap();
        let Ok(groups) = state.group_ids(kind) else {
            return;
        };
        let id = state.allocate_id();
        state.pools.push(PoolRow {
            id,
            group1_id: groups.0,
            group2_id: groups.1,
            mv1_id: left_id,
            mv2_id: right_id,
            deleted_at: deleted.then(Utc::now),
        });
    }

    pub fn active_link_count(&self, kind: RelationKind, left_id: i64) -> usize {
        let state = self.state.lock().unwrap();
        let Ok(groups) = state.group_ids(kind) else {
            return 0;
        };
        state
            .pools
            .iter()
            .filter(|p| {
                p.deleted_at.is_none()
                    && p.group1_id == groups.0
                    && p.group2_id == groups.1
                    && p.mv1_id == left_id
            })
            .count()
    }

    pub fn deleted_link_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.pools.iter().filter(|p| p.deleted_at.is_some()).count()
    }

    pub fn pool_ids(&self) -> Vec<i64> {
        self.state.lock().unwrap().pools.iter().map(|p| p.id).collect()
    }

    /// 下一次替换在软删除之后、提交之前失败
    pub fn fail_next_replace(&self) {
        self.failures.lock().unwrap().fail_next_replace = true;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.failures.lock().unwrap().query_delay = Some(delay);
    }

    async fn maybe_delay(&self) {
        let delay = self.failures.lock().unwrap().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AssociationRepository for MockAssociationRepository {
    async fn active_targets(&self, kind: RelationKind, left_id: i64) -> KeelResult<Vec<MixValue>> {
        self.active_targets_of_many(kind, &[left_id]).await
    }

    async fn active_targets_of_many(
        &self,
        kind: RelationKind,
        left_ids: &[i64],
    ) -> KeelResult<Vec<MixValue>> {
        self.maybe_delay().await;
        Ok(self.state.lock().unwrap().active_targets(kind, left_ids))
    }

    async fn link(&self, kind: RelationKind, left_id: i64, right_ids: &[i64]) -> KeelResult<u64> {
        let right_ids: Vec<i64> = right_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut state = self.state.lock().unwrap();
        let groups = state.group_ids(kind)?;
        state.ensure_targets_exist(kind, groups.1, &right_ids)?;
        Ok(state.insert_links(groups, left_id, &right_ids))
    }

    async fn replace_targets(
        &self,
        kind: RelationKind,
        left_id: i64,
        right_ids: &[i64],
    ) -> KeelResult<u64> {
        self.maybe_delay().await;
        let right_ids: Vec<i64> = right_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let fail = std::mem::take(&mut self.failures.lock().unwrap().fail_next_replace);

        let mut state = self.state.lock().unwrap();
        // 在副本上操作，成功后整体提交
        let mut working = state.clone();
        let groups = working.group_ids(kind)?;
        working.ensure_targets_exist(kind, groups.1, &right_ids)?;

        let now = Utc::now();
        for pool in working.pools.iter_mut().filter(|p| {
            p.deleted_at.is_none()
                && p.group1_id == groups.0
                && p.group2_id == groups.1
                && p.mv1_id == left_id
        }) {
            pool.deleted_at = Some(now);
        }
        if fail {
            return Err(KeelError::persistence("模拟的批量插入失败"));
        }
        let inserted = working.insert_links(groups, left_id, &right_ids);

        *state = working;
        Ok(inserted)
    }
}

#[async_trait]
impl ReferenceRepository for MockAssociationRepository {
    async fn ensure_group(&self, name: &str) -> KeelResult<i64> {
        Ok(self.state.lock().unwrap().ensure_group(name))
    }

    async fn ensure_mix_value(&self, group: &str, name: &str) -> KeelResult<MixValue> {
        Ok(self.add_value(group, name))
    }

    async fn find_mix_values(&self, group: &str) -> KeelResult<Vec<MixValue>> {
        let state = self.state.lock().unwrap();
        let Some(group_id) = state.groups.get(group).copied() else {
            return Ok(Vec::new());
        };
        Ok(state
            .mix_values
            .iter()
            .filter(|mv| mv.group_id == group_id)
            .cloned()
            .collect())
    }
}

/// 记录重新加载回调的观察者
#[derive(Debug, Clone, Default)]
pub struct RecordingReloadObserver {
    dropped: Arc<Mutex<Vec<(String, DropReason)>>>,
    failed: Arc<Mutex<Vec<(String, String)>>>,
    reinstated: Arc<Mutex<Vec<(i64, i64)>>>,
}

impl RecordingReloadObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> Vec<(String, DropReason)> {
        self.dropped.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().unwrap().clone()
    }

    /// `(旧记录ID, 新记录ID)`
    pub fn reinstated(&self) -> Vec<(i64, i64)> {
        self.reinstated.lock().unwrap().clone()
    }
}

impl ReloadObserver for RecordingReloadObserver {
    fn on_dropped(&self, record: &ScheduleRecord, reason: &DropReason) {
        self.dropped
            .lock()
            .unwrap()
            .push((record.name.clone(), reason.clone()));
    }

    fn on_failed(&self, record: &ScheduleRecord, error: &str) {
        self.failed
            .lock()
            .unwrap()
            .push((record.name.clone(), error.to_string()));
    }

    fn on_reinstated(&self, stale: &ScheduleRecord, fresh: &ScheduleRecord) {
        self.reinstated.lock().unwrap().push((stale.id, fresh.id));
    }
}
