//! 变更跟踪（ChangeTracker）
//!
//! 以快照方式跟踪实体：登记时记录实体的序列化行作为原始值，
//! `detect_changes` 重新序列化当前值并逐列比较。保存流程在此之上完成
//! 审计写入、软删除改写、变更事件生成与事件收集，最后生成行变更交给存储。
//!
//! 条目按登记顺序保存，遍历顺序稳定；同一 `(表, 标识)` 只会对应一个条目。
//! 尚未持久化的实体使用负数临时标识，提交后替换为存储生成的标识。
//!
use crate::error::{DbError, DbResult};
use crate::model::{DISCRIMINATOR_COLUMN, EntityMapping};
use crate::store::{Row, RowChange};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tabula_domain::audit::AuditInfo;
use tabula_domain::domain_event::{DomainEvent, EntityChangedEvent};
use tabula_domain::entity::{Entity, ID_COLUMN};

/// 条目状态，顺序与“变更程度”一致：大于 `Unchanged` 的状态都会写入存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityState {
    Detached,
    Unchanged,
    Deleted,
    Modified,
    Added,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detached => "detached",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Modified => "modified",
            Self::Added => "added",
        };
        f.write_str(s)
    }
}

/// 被标记为修改的列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifiedColumns {
    All,
    Only(BTreeSet<String>),
    AllExcept(BTreeSet<String>),
}

impl ModifiedColumns {
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(set) if set.is_empty())
    }

    pub fn contains(&self, column: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(column),
            Self::AllExcept(set) => !set.contains(column),
        }
    }

    fn mark<'a>(&mut self, columns: impl IntoIterator<Item = &'a str>) {
        match self {
            Self::All => {}
            Self::Only(set) => set.extend(columns.into_iter().map(str::to_string)),
            Self::AllExcept(set) => {
                for c in columns {
                    set.remove(c);
                }
            }
        }
    }
}

/// 更新语句永远不写的列
const NEVER_UPDATED: [&str; 3] = [ID_COLUMN, "created_by", "created_at"];

pub(crate) fn to_row<E: Entity>(entity: &E, discriminator: Option<&'static str>) -> DbResult<Row> {
    let mut row = match serde_json::to_value(entity)? {
        Value::Object(map) => map,
        other => {
            return Err(DbError::invalid_state(format!(
                "entity {} must serialize to an object, got {other}",
                E::TYPE
            )));
        }
    };
    if let Some(d) = discriminator {
        row.insert(DISCRIMINATOR_COLUMN.to_string(), Value::from(d));
    }
    Ok(row)
}

fn diff_columns(current: &Row, original: &Row) -> Vec<String> {
    current
        .iter()
        .filter(|(k, v)| k.as_str() != ID_COLUMN && original.get(k.as_str()) != Some(*v))
        .map(|(k, _)| k.clone())
        .chain(
            original
                .keys()
                .filter(|k| k.as_str() != ID_COLUMN && !current.contains_key(k.as_str()))
                .cloned(),
        )
        .collect()
}

/// 类型擦除后的跟踪条目
pub(crate) trait TrackedEntry: Send + Sync {
    fn entity_type(&self) -> &'static str;
    fn table(&self) -> &'static str;
    fn key(&self) -> i64;
    fn set_key(&mut self, key: i64);
    fn state(&self) -> EntityState;
    fn detect_changes(&mut self) -> DbResult<bool>;
    fn stamp_audit(&mut self, user_id: i64, now: NaiveDateTime) -> bool;
    fn convert_soft_delete(&mut self) -> bool;
    fn raise_changed(&mut self) -> bool;
    fn take_events(&mut self) -> Vec<Arc<dyn DomainEvent>>;
    fn row_change(&self) -> DbResult<Option<RowChange>>;
    fn accept_changes(&mut self) -> DbResult<()>;
    fn reload(&mut self, row: Row) -> DbResult<()>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct Entry<E: Entity> {
    current: E,
    original: Row,
    state: EntityState,
    modified: ModifiedColumns,
    mapping: EntityMapping,
}

impl<E: Entity> Entry<E> {
    fn new(current: E, original: Row, state: EntityState, mapping: EntityMapping) -> Self {
        let modified = match state {
            EntityState::Modified => ModifiedColumns::All,
            _ => ModifiedColumns::none(),
        };
        Self {
            current,
            original,
            state,
            modified,
            mapping,
        }
    }

    fn current_row(&self) -> DbResult<Row> {
        to_row(&self.current, self.mapping.discriminator())
    }

    pub(crate) fn current(&self) -> &E {
        &self.current
    }

    pub(crate) fn current_mut(&mut self) -> &mut E {
        &mut self.current
    }

    /// 以调用方的值替换当前值；跟踪副本上尚未发布、调用方又没有的事件排在前面保留下来
    fn replace_current(&mut self, mut incoming: E) {
        if let (Some(from), Some(to)) = (
            self.current.as_event_source_mut(),
            incoming.as_event_source_mut(),
        ) {
            let pending = from.domain_events_mut().take();
            if !pending.is_empty() {
                let known: BTreeSet<i64> = pending.iter().map(|e| e.event_id()).collect();
                let mut merged = pending;
                merged.extend(
                    to.domain_events_mut()
                        .take()
                        .into_iter()
                        .filter(|e| !known.contains(&e.event_id())),
                );
                for event in merged {
                    to.domain_events_mut().push(event);
                }
            }
        }
        self.current = incoming;
    }

    fn update_columns(&self, row: &Row) -> Row {
        row.iter()
            .filter(|(k, _)| !NEVER_UPDATED.contains(&k.as_str()) && self.modified.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<E: Entity> TrackedEntry for Entry<E> {
    fn entity_type(&self) -> &'static str {
        E::TYPE
    }

    fn table(&self) -> &'static str {
        self.mapping.table()
    }

    fn key(&self) -> i64 {
        self.current.id()
    }

    fn set_key(&mut self, key: i64) {
        self.current.set_id(key);
    }

    fn state(&self) -> EntityState {
        self.state
    }

    fn detect_changes(&mut self) -> DbResult<bool> {
        if !matches!(self.state, EntityState::Unchanged | EntityState::Modified) {
            return Ok(false);
        }
        let row = self.current_row()?;
        let changed = diff_columns(&row, &self.original);
        if changed.is_empty() {
            return Ok(false);
        }
        if self.state == EntityState::Unchanged {
            self.state = EntityState::Modified;
            self.modified = ModifiedColumns::none();
        }
        self.modified.mark(changed.iter().map(String::as_str));
        Ok(true)
    }

    fn stamp_audit(&mut self, user_id: i64, now: NaiveDateTime) -> bool {
        let state = self.state;
        let Some(auditable) = self.current.as_auditable_mut() else {
            return false;
        };
        match state {
            EntityState::Added => {
                auditable.audit_info_mut().stamp_created(user_id, now);
                true
            }
            EntityState::Modified => {
                auditable.audit_info_mut().stamp_modified(user_id, now);
                self.modified.mark(AuditInfo::MODIFIED_COLUMNS);
                true
            }
            _ => false,
        }
    }

    fn convert_soft_delete(&mut self) -> bool {
        if self.state != EntityState::Deleted {
            return false;
        }
        let Some(soft) = self.current.as_soft_delete_mut() else {
            return false;
        };
        soft.set_deleted(true);
        self.state = EntityState::Unchanged;
        self.modified = ModifiedColumns::none();
        true
    }

    fn raise_changed(&mut self) -> bool {
        if !E::CAPABILITIES.version_tracking() || self.state <= EntityState::Unchanged {
            return false;
        }
        let mut snapshot = self.current.clone();
        if let Some(source) = snapshot.as_event_source_mut() {
            source.domain_events_mut().take();
        }
        match self.current.as_event_source_mut() {
            Some(source) => {
                source
                    .domain_events_mut()
                    .raise(EntityChangedEvent::new(snapshot));
                true
            }
            None => false,
        }
    }

    fn take_events(&mut self) -> Vec<Arc<dyn DomainEvent>> {
        self.current
            .as_event_source_mut()
            .map(|source| source.domain_events_mut().take())
            .unwrap_or_default()
    }

    fn row_change(&self) -> DbResult<Option<RowChange>> {
        let table = self.mapping.table();
        let key = self.key();
        match self.state {
            EntityState::Added => {
                let mut row = self.current_row()?;
                row.remove(ID_COLUMN);
                Ok(Some(RowChange::Insert {
                    table,
                    id: (key > 0).then_some(key),
                    row,
                }))
            }
            EntityState::Modified | EntityState::Deleted if key <= 0 => {
                Err(DbError::invalid_state(format!(
                    "{} entity {} with key {key} has never been stored",
                    self.state,
                    E::TYPE
                )))
            }
            EntityState::Modified => {
                let columns = self.update_columns(&self.current_row()?);
                if columns.is_empty() {
                    return Ok(None);
                }
                Ok(Some(RowChange::Update {
                    table,
                    id: key,
                    columns,
                }))
            }
            EntityState::Deleted => Ok(Some(RowChange::Delete { table, id: key })),
            EntityState::Unchanged | EntityState::Detached => Ok(None),
        }
    }

    fn accept_changes(&mut self) -> DbResult<()> {
        match self.state {
            EntityState::Added | EntityState::Modified | EntityState::Unchanged => {
                self.original = self.current_row()?;
                self.state = EntityState::Unchanged;
            }
            EntityState::Deleted => self.state = EntityState::Detached,
            EntityState::Detached => {}
        }
        self.modified = ModifiedColumns::none();
        Ok(())
    }

    fn reload(&mut self, row: Row) -> DbResult<()> {
        let mut fresh: E = serde_json::from_value(Value::Object(row))?;
        // 事件缓冲区不属于存储内容，重新加载时保留
        if let (Some(from), Some(to)) = (
            self.current.as_event_source_mut(),
            fresh.as_event_source_mut(),
        ) {
            *to.domain_events_mut() = from.domain_events().clone();
        }
        self.current = fresh;
        self.original = self.current_row()?;
        self.state = EntityState::Unchanged;
        self.modified = ModifiedColumns::none();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 一次提交准备好的行变更
pub(crate) struct PreparedCommit {
    pub(crate) changes: Vec<RowChange>,
    /// 每个插入对应的条目序号，顺序与 `changes` 中的插入一致
    pub(crate) inserted: Vec<u64>,
}

/// 变更跟踪器
pub struct ChangeTracker {
    entries: BTreeMap<u64, Box<dyn TrackedEntry>>,
    index: HashMap<(&'static str, i64), u64>,
    next_seq: u64,
    next_temp_key: i64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .values()
                    .map(|e| (e.entity_type(), e.key(), e.state())),
            )
            .finish()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 1,
            next_temp_key: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// 是否存在需要写入存储的条目
    pub fn has_changes(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.state() > EntityState::Unchanged)
    }

    /// 按 (表, 标识) 查询条目状态
    pub fn state_of(&self, table: &'static str, key: i64) -> Option<EntityState> {
        self.index
            .get(&(table, key))
            .and_then(|seq| self.entries.get(seq))
            .map(|e| e.state())
    }

    fn alloc_temp_key(&mut self) -> i64 {
        let key = self.next_temp_key;
        self.next_temp_key -= 1;
        key
    }

    fn insert_entry<E: Entity>(&mut self, entry: Entry<E>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert((entry.table(), entry.key()), seq);
        self.entries.insert(seq, Box::new(entry));
        seq
    }

    fn remove_entry(&mut self, seq: u64) {
        if let Some(entry) = self.entries.remove(&seq) {
            self.index.remove(&(entry.table(), entry.key()));
        }
    }

    /// 按 (表, 标识) 查找条目序号，条目类型必须与 `E` 一致
    pub(crate) fn lookup<E: Entity>(
        &self,
        mapping: &EntityMapping,
        key: i64,
    ) -> DbResult<Option<u64>> {
        let Some(&seq) = self.index.get(&(mapping.table(), key)) else {
            return Ok(None);
        };
        match self.entries.get(&seq) {
            Some(entry) if entry.as_any().is::<Entry<E>>() => Ok(Some(seq)),
            Some(entry) => Err(DbError::invalid_state(format!(
                "key {key} in table {} is already tracked as {}",
                mapping.table(),
                entry.entity_type()
            ))),
            None => Ok(None),
        }
    }

    pub(crate) fn entry<E: Entity>(&self, seq: u64) -> Option<&Entry<E>> {
        self.entries
            .get(&seq)
            .and_then(|e| e.as_any().downcast_ref::<Entry<E>>())
    }

    pub(crate) fn entry_mut<E: Entity>(&mut self, seq: u64) -> Option<&mut Entry<E>> {
        self.entries
            .get_mut(&seq)
            .and_then(|e| e.as_any_mut().downcast_mut::<Entry<E>>())
    }

    /// 条目当前值的副本
    pub(crate) fn current<E: Entity>(&self, seq: u64) -> Option<E> {
        self.entry::<E>(seq).map(|e| e.current().clone())
    }

    pub(crate) fn state_by_seq(&self, seq: u64) -> Option<EntityState> {
        self.entries.get(&seq).map(|e| e.state())
    }

    /// 登记新增：未分配标识的实体获得临时标识
    pub(crate) fn add<E: Entity>(&mut self, mut entity: E, mapping: EntityMapping) -> DbResult<u64> {
        if entity.id() <= 0 {
            let key = self.alloc_temp_key();
            entity.set_id(key);
        } else if self.lookup::<E>(&mapping, entity.id())?.is_some() {
            return Err(DbError::invalid_state(format!(
                "entity {} with key {} is already tracked",
                E::TYPE,
                entity.id()
            )));
        }
        let entry = Entry::new(entity, Row::new(), EntityState::Added, mapping);
        Ok(self.insert_entry(entry))
    }

    /// 登记为未修改：已跟踪时以传入值作为新的原始值；未分配标识时按新增处理
    pub(crate) fn attach<E: Entity>(&mut self, entity: E, mapping: EntityMapping) -> DbResult<u64> {
        if entity.id() == 0 {
            return self.add(entity, mapping);
        }
        let original = to_row(&entity, mapping.discriminator())?;
        match self.lookup::<E>(&mapping, entity.id())? {
            Some(seq) => {
                if let Some(entry) = self.entry_mut::<E>(seq) {
                    if entry.state != EntityState::Added {
                        entry.state = EntityState::Unchanged;
                        entry.original = original;
                        entry.modified = ModifiedColumns::none();
                    }
                    entry.replace_current(entity);
                }
                Ok(seq)
            }
            None => {
                let entry = Entry::new(entity, original, EntityState::Unchanged, mapping);
                Ok(self.insert_entry(entry))
            }
        }
    }

    /// 登记整体更新：所有列标记为修改；未分配标识时按新增处理
    pub(crate) fn update<E: Entity>(&mut self, entity: E, mapping: EntityMapping) -> DbResult<u64> {
        if entity.id() == 0 {
            return self.add(entity, mapping);
        }
        match self.lookup::<E>(&mapping, entity.id())? {
            Some(seq) => {
                if let Some(entry) = self.entry_mut::<E>(seq) {
                    entry.replace_current(entity);
                    if entry.state != EntityState::Added {
                        entry.state = EntityState::Modified;
                        entry.modified = ModifiedColumns::All;
                    }
                }
                Ok(seq)
            }
            None if entity.id() < 0 => Err(DbError::invalid_state(format!(
                "temporary key {} of {} is not tracked",
                entity.id(),
                E::TYPE
            ))),
            None => {
                let original = to_row(&entity, mapping.discriminator())?;
                let entry = Entry::new(entity, original, EntityState::Modified, mapping);
                Ok(self.insert_entry(entry))
            }
        }
    }

    /// 登记删除：尚未持久化的新增条目直接脱离跟踪
    pub(crate) fn delete<E: Entity>(&mut self, entity: E, mapping: EntityMapping) -> DbResult<()> {
        match self.lookup::<E>(&mapping, entity.id())? {
            Some(seq) => {
                let added = self.state_by_seq(seq) == Some(EntityState::Added);
                if added {
                    self.remove_entry(seq);
                } else if let Some(entry) = self.entry_mut::<E>(seq) {
                    entry.replace_current(entity);
                    entry.state = EntityState::Deleted;
                }
                Ok(())
            }
            None if entity.id() <= 0 => Err(DbError::invalid_state(format!(
                "cannot delete {} entity without a stored key",
                E::TYPE
            ))),
            None => {
                let original = to_row(&entity, mapping.discriminator())?;
                let entry = Entry::new(entity, original, EntityState::Deleted, mapping);
                self.insert_entry(entry);
                Ok(())
            }
        }
    }

    /// 查询结果的身份解析：已跟踪则返回跟踪中的当前值，否则以未修改状态开始跟踪
    pub(crate) fn track_loaded<E: Entity>(
        &mut self,
        entity: E,
        mapping: EntityMapping,
    ) -> DbResult<E> {
        if let Some(seq) = self.lookup::<E>(&mapping, entity.id())? {
            if let Some(current) = self.current::<E>(seq) {
                return Ok(current);
            }
        }
        let original = to_row(&entity, mapping.discriminator())?;
        let entry = Entry::new(entity.clone(), original, EntityState::Unchanged, mapping);
        self.insert_entry(entry);
        Ok(entity)
    }

    /// 以传入值替换已跟踪条目的当前值，并只把 `columns` 标记为修改
    pub(crate) fn mark_columns<E: Entity>(
        &mut self,
        seq: u64,
        entity: E,
        columns: ModifiedColumns,
    ) -> DbResult<()> {
        let entry = self.entry_mut::<E>(seq).ok_or_else(|| {
            DbError::invalid_state(format!("entity {} is not tracked", E::TYPE))
        })?;
        let row = to_row(&entity, entry.mapping.discriminator())?;
        let known: BTreeSet<&str> = row.keys().map(String::as_str).collect();
        let names = match &columns {
            ModifiedColumns::All => BTreeSet::new(),
            ModifiedColumns::Only(set) | ModifiedColumns::AllExcept(set) => set.clone(),
        };
        for name in &names {
            if name == ID_COLUMN {
                return Err(DbError::argument(format!(
                    "key column {ID_COLUMN} of {} cannot be marked as modified",
                    E::TYPE
                )));
            }
            if !known.contains(name.as_str()) {
                return Err(DbError::argument(format!(
                    "unknown property {name} on entity {}",
                    E::TYPE
                )));
            }
        }
        entry.replace_current(entity);
        entry.original = row;
        entry.state = if columns.is_empty() {
            EntityState::Unchanged
        } else {
            EntityState::Modified
        };
        entry.modified = columns;
        Ok(())
    }

    /// 对所有未修改/已修改条目执行快照比较，返回新发现的变更条目数
    pub fn detect_changes(&mut self) -> DbResult<usize> {
        let mut changed = 0;
        for entry in self.entries.values_mut() {
            if entry.detect_changes()? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// 为新增与修改的审计实体写入创建/修改信息
    pub fn stamp_audit(&mut self, user_id: i64, now: NaiveDateTime) -> usize {
        self.entries
            .values_mut()
            .map(|e| usize::from(e.stamp_audit(user_id, now)))
            .sum()
    }

    /// 把软删除实体的删除改写为设置删除标记
    pub fn convert_soft_deletes(&mut self) -> usize {
        self.entries
            .values_mut()
            .map(|e| usize::from(e.convert_soft_delete()))
            .sum()
    }

    /// 为有变更的版本跟踪实体追加 `EntityChangedEvent`
    pub fn raise_change_events(&mut self) -> usize {
        self.entries
            .values_mut()
            .map(|e| usize::from(e.raise_changed()))
            .sum()
    }

    /// 按跟踪顺序取走全部实体的待派发事件
    pub fn drain_events(&mut self) -> Vec<Arc<dyn DomainEvent>> {
        self.entries
            .values_mut()
            .flat_map(|e| e.take_events())
            .collect()
    }

    /// 最终变更检测并生成行变更
    pub(crate) fn prepare_commit(&mut self) -> DbResult<PreparedCommit> {
        self.detect_changes()?;
        let mut prepared = PreparedCommit {
            changes: Vec::new(),
            inserted: Vec::new(),
        };
        for (seq, entry) in &self.entries {
            if let Some(change) = entry.row_change()? {
                if matches!(change, RowChange::Insert { .. }) {
                    prepared.inserted.push(*seq);
                }
                prepared.changes.push(change);
            }
        }
        Ok(prepared)
    }

    /// 提交成功后：回写存储生成的标识，接受全部变更，移除已物理删除的条目
    pub(crate) fn complete_commit(&mut self, inserted: &[u64], ids: &[i64]) -> DbResult<()> {
        if inserted.len() != ids.len() {
            return Err(DbError::persistence(format!(
                "store returned {} generated key(s) for {} insert(s)",
                ids.len(),
                inserted.len()
            )));
        }
        for (seq, id) in inserted.iter().zip(ids) {
            if let Some(entry) = self.entries.get_mut(seq) {
                self.index.remove(&(entry.table(), entry.key()));
                entry.set_key(*id);
                self.index.insert((entry.table(), *id), *seq);
            }
        }

        let mut detached = Vec::new();
        for (seq, entry) in self.entries.iter_mut() {
            entry.accept_changes()?;
            if entry.state() == EntityState::Detached {
                detached.push(*seq);
            }
        }
        for seq in detached {
            self.remove_entry(seq);
        }
        Ok(())
    }

    /// 已跟踪条目的 (序号, 表, 标识)，按跟踪顺序
    pub(crate) fn keys(&self) -> Vec<(u64, &'static str, i64)> {
        self.entries
            .iter()
            .map(|(seq, e)| (*seq, e.table(), e.key()))
            .collect()
    }

    /// 以存储中的行覆盖条目；`None` 表示存储中不存在，条目脱离跟踪
    pub(crate) fn reload(&mut self, seq: u64, row: Option<Row>) -> DbResult<()> {
        match row {
            Some(row) => {
                if let Some(entry) = self.entries.get_mut(&seq) {
                    entry.reload(row)?;
                }
            }
            None => self.remove_entry(seq),
        }
        Ok(())
    }
}
