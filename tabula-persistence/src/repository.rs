//! 实体仓储（Repository）
//!
//! 面向单个实体类型的数据访问入口，共享所属上下文的跟踪器。
//! 写操作先登记状态变化，再按 `commit` 决定是否立即执行保存流程；
//! 读操作分为跟踪（身份解析）与非跟踪两类。
//!
//! 调用方持有的是实体的副本：登记之后跟踪器以自己的副本为准，
//! 操作结束时会把跟踪器中的当前值（临时/生成的标识、审计信息）回写给调用方。
//!
use crate::context::{ContextState, DbContext};
use crate::error::{DbError, DbResult};
use crate::include::Include;
use crate::model::EntityMapping;
use crate::query::Query;
use crate::tracker::{ModifiedColumns, to_row};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tabula_domain::entity::Entity;
use tabula_domain::specification::Specification;
use tokio::sync::MutexGuard;
use tracing::debug;

pub struct Repository<E: Entity> {
    ctx: DbContext,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.ctx.clone())
    }
}

impl<E: Entity> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &E::TYPE)
            .finish()
    }
}

fn decode<E: Entity>(row: crate::store::Row) -> DbResult<E> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

fn column_set(properties: &[&str]) -> BTreeSet<String> {
    properties.iter().map(|p| p.to_string()).collect()
}

impl<E: Entity> Repository<E> {
    pub fn new(ctx: DbContext) -> Self {
        Self {
            ctx,
            _marker: PhantomData,
        }
    }

    pub fn context(&self) -> &DbContext {
        &self.ctx
    }

    fn mapping(&self) -> DbResult<EntityMapping> {
        self.ctx.model().mapping::<E>()
    }

    // 可选地执行保存，之后无论成败都把跟踪器中的当前值回写给调用方
    async fn finish(
        &self,
        state: MutexGuard<'_, ContextState>,
        staged: &[u64],
        entities: &mut [E],
        commit: bool,
    ) -> DbResult<usize> {
        let (state, result) = if commit {
            self.ctx.save_locked(state).await
        } else {
            (state, Ok(0))
        };
        for (seq, entity) in staged.iter().zip(entities.iter_mut()) {
            if let Some(current) = state.tracker.current::<E>(*seq) {
                *entity = current;
            }
        }
        result
    }

    /// 登记新增；`commit` 为真时立即保存
    pub async fn add(&self, entity: &mut E, commit: bool) -> DbResult<usize> {
        self.add_range(std::slice::from_mut(entity), commit).await
    }

    pub async fn add_range(&self, entities: &mut [E], commit: bool) -> DbResult<usize> {
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        let mut staged = Vec::with_capacity(entities.len());
        for entity in entities.iter() {
            staged.push(state.tracker.add(entity.clone(), mapping)?);
        }
        debug!(entity = E::TYPE, count = staged.len(), commit, "add staged");
        self.finish(state, &staged, entities, commit).await
    }

    /// 登记整体更新；未分配标识的实体按新增处理
    pub async fn update(&self, entity: &mut E, commit: bool) -> DbResult<usize> {
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        let seq = state.tracker.update(entity.clone(), mapping)?;
        debug!(entity = E::TYPE, key = entity.id(), commit, "update staged");
        self.finish(state, &[seq], std::slice::from_mut(entity), commit)
            .await
    }

    /// 登记删除；软删除实体在保存时改写为设置删除标记
    pub async fn delete(&self, entity: &E, commit: bool) -> DbResult<usize> {
        self.delete_range(std::slice::from_ref(entity), commit).await
    }

    pub async fn delete_range(&self, entities: &[E], commit: bool) -> DbResult<usize> {
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        for entity in entities {
            state.tracker.delete(entity.clone(), mapping)?;
        }
        debug!(entity = E::TYPE, count = entities.len(), commit, "delete staged");
        self.finish(state, &[], &mut [], commit).await
    }

    /// 以未修改状态开始跟踪，不触发保存
    pub async fn attach(&self, entity: &mut E) -> DbResult<()> {
        self.attach_range(std::slice::from_mut(entity)).await
    }

    pub async fn attach_range(&self, entities: &mut [E]) -> DbResult<()> {
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        let mut staged = Vec::with_capacity(entities.len());
        for entity in entities.iter() {
            staged.push(state.tracker.attach(entity.clone(), mapping)?);
        }
        self.finish(state, &staged, entities, false).await?;
        Ok(())
    }

    pub async fn save_changes(&self, commit: bool) -> DbResult<usize> {
        self.ctx.save_changes(commit).await
    }

    /// 实体在跟踪器中的当前标识：首次提交前为临时标识，之后为存储生成的标识
    pub async fn get_temp_id(&self, entity: &E) -> DbResult<i64> {
        let mapping = self.mapping()?;
        let state = self.ctx.lock().await;
        state
            .tracker
            .lookup::<E>(&mapping, entity.id())?
            .and_then(|seq| state.tracker.current::<E>(seq))
            .map(|current| current.id())
            .ok_or_else(|| {
                DbError::invalid_state(format!(
                    "entity {} with key {} is not tracked",
                    E::TYPE,
                    entity.id()
                ))
            })
    }

    /// 按标识读取：先查跟踪器，再查存储，结果受全局过滤器约束
    pub async fn get(&self, id: i64) -> DbResult<Option<E>> {
        let mapping = self.mapping()?;
        let model = self.ctx.model();
        let mut state = self.ctx.lock().await;

        if let Some(seq) = state.tracker.lookup::<E>(&mapping, id)? {
            let Some(current) = state.tracker.current::<E>(seq) else {
                return Ok(None);
            };
            let row = to_row(&current, mapping.discriminator())?;
            return Ok(model.is_visible(&mapping, &row).then_some(current));
        }

        match self.ctx.store().fetch(mapping.table(), id).await? {
            Some(row) if model.is_visible(&mapping, &row) => {
                let entity = decode::<E>(row)?;
                Ok(Some(state.tracker.track_loaded(entity, mapping)?))
            }
            _ => Ok(None),
        }
    }

    pub async fn get_no_tracking(&self, id: i64) -> DbResult<Option<E>> {
        let mapping = self.mapping()?;
        match self.ctx.store().fetch(mapping.table(), id).await? {
            Some(row) if self.ctx.model().is_visible(&mapping, &row) => Ok(Some(decode(row)?)),
            _ => Ok(None),
        }
    }

    pub async fn get_all(&self) -> DbResult<Vec<E>> {
        self.query().to_list().await
    }

    pub async fn get_all_no_tracking(&self) -> DbResult<Vec<E>> {
        self.query_no_tracking().to_list().await
    }

    /// 第一个满足条件的实体
    pub async fn find<S>(&self, spec: S) -> DbResult<Option<E>>
    where
        S: Specification<E> + 'static,
    {
        self.query().filter(spec).first().await
    }

    pub async fn find_no_tracking<S>(&self, spec: S) -> DbResult<Option<E>>
    where
        S: Specification<E> + 'static,
    {
        self.query_no_tracking().filter(spec).first().await
    }

    pub async fn find_all<S>(&self, spec: S) -> DbResult<Vec<E>>
    where
        S: Specification<E> + 'static,
    {
        self.query().filter(spec).to_list().await
    }

    pub async fn find_all_no_tracking<S>(&self, spec: S) -> DbResult<Vec<E>>
    where
        S: Specification<E> + 'static,
    {
        self.query_no_tracking().filter(spec).to_list().await
    }

    /// 带条件的可组合查询
    pub fn find_by<S>(&self, spec: S) -> Query<E>
    where
        S: Specification<E> + 'static,
    {
        self.query().filter(spec)
    }

    pub async fn first_or_default<S>(&self, spec: S) -> DbResult<Option<E>>
    where
        S: Specification<E> + 'static,
    {
        self.find(spec).await
    }

    /// 跟踪查询
    pub fn query(&self) -> Query<E> {
        Query::new(self.ctx.clone(), true)
    }

    /// 非跟踪查询
    pub fn query_no_tracking(&self) -> Query<E> {
        Query::new(self.ctx.clone(), false)
    }

    /// 带导航加载的跟踪查询
    pub fn include_many(&self, includes: Vec<Arc<dyn Include<E>>>) -> Query<E> {
        self.query().with_includes(includes)
    }

    /// 先按条件过滤，再加载导航
    pub fn include_many_where<S>(&self, spec: S, includes: Vec<Arc<dyn Include<E>>>) -> Query<E>
    where
        S: Specification<E> + 'static,
    {
        self.query().filter(spec).with_includes(includes)
    }

    /// 就地修改已跟踪（或可被读取并跟踪）的实体，修改在下次保存时被发现
    pub async fn modify<F>(&self, id: i64, f: F) -> DbResult<Option<E>>
    where
        F: FnOnce(&mut E) + Send,
    {
        if self.get(id).await?.is_none() {
            return Ok(None);
        }
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        let Some(seq) = state.tracker.lookup::<E>(&mapping, id)? else {
            return Ok(None);
        };
        let Some(entry) = state.tracker.entry_mut::<E>(seq) else {
            return Ok(None);
        };
        f(entry.current_mut());
        Ok(Some(entry.current().clone()))
    }

    /// 只更新指定属性：实体必须已被跟踪
    pub async fn update_special_properties(
        &self,
        entity: &E,
        commit: bool,
        properties: &[&str],
    ) -> DbResult<usize> {
        self.update_sparse(entity, commit, ModifiedColumns::Only(column_set(properties)))
            .await
    }

    /// 更新除指定属性之外的全部属性：实体必须已被跟踪
    pub async fn update_excepted_properties(
        &self,
        entity: &E,
        commit: bool,
        properties: &[&str],
    ) -> DbResult<usize> {
        self.update_sparse(entity, commit, ModifiedColumns::AllExcept(column_set(properties)))
            .await
    }

    async fn update_sparse(
        &self,
        entity: &E,
        commit: bool,
        columns: ModifiedColumns,
    ) -> DbResult<usize> {
        let mapping = self.mapping()?;
        let mut state = self.ctx.lock().await;
        let seq = state
            .tracker
            .lookup::<E>(&mapping, entity.id())?
            .ok_or_else(|| {
                DbError::invalid_state(format!(
                    "entity {} with key {} must be tracked before a partial update",
                    E::TYPE,
                    entity.id()
                ))
            })?;
        debug!(entity = E::TYPE, key = entity.id(), columns = ?columns, "partial update staged");
        state.tracker.mark_columns(seq, entity.clone(), columns)?;
        if commit {
            self.ctx.save_locked(state).await.1
        } else {
            Ok(0)
        }
    }
}
