//! 数据上下文（DbContext）与保存流程
//!
//! 一个上下文对应一个工作单元：持有存储、模型、配置、可选的事件发布者，
//! 以及位于互斥锁之后的变更跟踪器与当前调用者身份。同一上下文上的跟踪操作依次执行。
//!
//! 保存流程（`save_changes(true)`）严格按以下顺序执行：
//! 1. 快照比较，发现未显式登记的修改；
//! 2. 为新增/修改的审计实体写入创建/修改信息；
//! 3. 软删除实体的删除改写为设置删除标记；
//! 4. 有变更的版本跟踪实体追加 `EntityChangedEvent`；
//! 5. 按跟踪顺序取走全部实体的事件，依次发布并等待完成；
//! 6. 最终变更检测后把行变更原子地提交给存储，回写生成的标识并接受变更。
//!
//! 事件在提交之前发布：订阅方收到的是“即将提交”的通知。发布期间不持有跟踪器的锁，
//! 处理器登记的变更会在随后的最终变更检测中一并提交。
//! 发布失败时不会尝试提交；任何失败都不会撤销已经写入实体的审计信息。
//!
use crate::error::{DbError, DbResult};
use crate::identity::{Actor, AuditIdentity};
use crate::model::Model;
use crate::options::DbContextOptions;
use crate::repository::Repository;
use crate::store::Store;
use crate::tracker::{ChangeTracker, EntityState};
use bon::bon;
use chrono::Local;
use std::fmt;
use std::sync::Arc;
use tabula_domain::domain_event::DomainEvent;
use tabula_domain::entity::Entity;
use tabula_domain::eventing::EventPublisher;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// 上下文的可变状态
pub(crate) struct ContextState {
    pub(crate) tracker: ChangeTracker,
    pub(crate) actor: Option<Actor>,
    /// 事件发布期间（锁已释放）为真
    pub(crate) saving: bool,
}

struct ContextInner {
    store: Arc<dyn Store>,
    model: Model,
    options: DbContextOptions,
    identity: AuditIdentity,
    publisher: Option<Arc<dyn EventPublisher>>,
    state: Mutex<ContextState>,
}

/// 数据上下文，克隆后共享同一组状态
#[derive(Clone)]
pub struct DbContext {
    inner: Arc<ContextInner>,
}

#[bon]
impl DbContext {
    #[builder]
    pub fn new(
        store: Arc<dyn Store>,
        model: Model,
        #[builder(default)] options: DbContextOptions,
        publisher: Option<Arc<dyn EventPublisher>>,
        actor: Option<Actor>,
    ) -> Self {
        let identity = AuditIdentity::from_options(&options);
        Self {
            inner: Arc::new(ContextInner {
                store,
                model,
                options,
                identity,
                publisher,
                state: Mutex::new(ContextState {
                    tracker: ChangeTracker::new(),
                    actor,
                    saving: false,
                }),
            }),
        }
    }
}

impl fmt::Debug for DbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbContext")
            .field("tables", &self.inner.model.tables())
            .field("options", &self.inner.options)
            .field("publisher", &self.inner.publisher.is_some())
            .finish()
    }
}

impl DbContext {
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    pub fn options(&self) -> &DbContextOptions {
        &self.inner.options
    }

    /// 实体仓储
    pub fn repository<E: Entity>(&self) -> Repository<E> {
        Repository::new(self.clone())
    }

    /// 为模型中的每张表建表
    pub async fn ensure_created(&self) -> DbResult<()> {
        self.inner
            .store
            .ensure_created(self.inner.model.tables())
            .await
    }

    pub async fn set_actor(&self, actor: Option<Actor>) {
        self.lock().await.actor = actor;
    }

    pub async fn actor(&self) -> Option<Actor> {
        self.lock().await.actor.clone()
    }

    /// 按当前身份与配置解析出的审计用户 ID
    pub async fn current_user_id(&self) -> i64 {
        let state = self.lock().await;
        self.inner.identity.resolve(state.actor.as_ref())
    }

    /// 当前跟踪的条目数
    pub async fn tracked_count(&self) -> usize {
        self.lock().await.tracker.len()
    }

    /// 实体在跟踪器中的状态（先做一次快照比较）；未跟踪时为 `Detached`
    pub async fn entry_state<E: Entity>(&self, id: i64) -> DbResult<EntityState> {
        let mapping = self.inner.model.mapping::<E>()?;
        let mut state = self.lock().await;
        state.tracker.detect_changes()?;
        Ok(match state.tracker.lookup::<E>(&mapping, id)? {
            Some(seq) => state
                .tracker
                .state_by_seq(seq)
                .unwrap_or(EntityState::Detached),
            None => EntityState::Detached,
        })
    }

    /// 放弃全部跟踪状态
    pub async fn clear_tracking(&self) {
        self.lock().await.tracker.clear();
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.inner.state.lock().await
    }

    /// 保存全部跟踪中的变更；`commit == false` 时不做任何事并返回 0
    #[instrument(skip(self), level = "debug")]
    pub async fn save_changes(&self, commit: bool) -> DbResult<usize> {
        if !commit {
            debug!("save deferred");
            return Ok(0);
        }
        let state = self.lock().await;
        let (_, result) = self.save_locked(state).await;
        result
    }

    /// 以指定身份保存，保存后恢复原有身份
    pub async fn save_changes_as(&self, actor: Actor, commit: bool) -> DbResult<usize> {
        if !commit {
            return Ok(0);
        }
        let mut state = self.lock().await;
        let previous = state.actor.replace(actor);
        let (mut state, result) = self.save_locked(state).await;
        state.actor = previous;
        result
    }

    /// 在已持有锁的情况下执行保存流程，返回（重新获取的）锁与结果
    ///
    /// 发布事件期间锁会被释放：处理器可以经同一上下文读取或登记变更，
    /// 登记的变更随本次提交一起写入；处理器内再次保存会得到 `InvalidState`。
    pub(crate) async fn save_locked<'a>(
        &'a self,
        mut state: MutexGuard<'a, ContextState>,
    ) -> (MutexGuard<'a, ContextState>, DbResult<usize>) {
        if state.saving {
            return (
                state,
                Err(DbError::invalid_state(
                    "save requested while events of another save are being dispatched",
                )),
            );
        }
        let events = match self.prepare(&mut state) {
            Ok(events) => events,
            Err(err) => return (state, Err(err)),
        };

        if !events.is_empty() && self.publishes() {
            state.saving = true;
            drop(state);
            let dispatched = self.dispatch(events).await;
            state = self.lock().await;
            state.saving = false;
            if let Err(err) = dispatched {
                return (state, Err(err));
            }
        } else if !events.is_empty() {
            debug!(count = events.len(), "no publisher, drained events dropped");
        }

        let result = self.commit(&mut state).await;
        (state, result)
    }

    fn publishes(&self) -> bool {
        self.inner.publisher.is_some() && self.inner.options.publish_events
    }

    /// 检测、审计、软删除与版本事件，然后取走待发布的事件
    fn prepare(&self, state: &mut ContextState) -> DbResult<Vec<Arc<dyn DomainEvent>>> {
        let user_id = self.inner.identity.resolve(state.actor.as_ref());
        let now = Local::now().naive_local();
        let tracker = &mut state.tracker;

        let detected = tracker.detect_changes()?;
        let stamped = tracker.stamp_audit(user_id, now);
        let soft_deleted = tracker.convert_soft_deletes();
        let raised = tracker.raise_change_events();
        debug!(
            tracked = tracker.len(),
            detected, stamped, soft_deleted, raised, user_id, "save pipeline prepared"
        );
        Ok(tracker.drain_events())
    }

    async fn commit(&self, state: &mut ContextState) -> DbResult<usize> {
        let tracker = &mut state.tracker;
        let prepared = tracker.prepare_commit()?;
        if prepared.changes.is_empty() {
            tracker.complete_commit(&[], &[])?;
            debug!("nothing to commit");
            return Ok(0);
        }

        let change_count = prepared.changes.len();
        let outcome = match self.inner.store.commit(prepared.changes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, changes = change_count, "commit rejected by store");
                return Err(err);
            }
        };
        tracker.complete_commit(&prepared.inserted, &outcome.inserted_ids)?;
        info!(affected = outcome.affected, "changes committed");
        Ok(outcome.affected)
    }

    async fn dispatch(&self, events: Vec<Arc<dyn DomainEvent>>) -> DbResult<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };

        let count = events.len();
        for event in events {
            let event_type = event.event_type().to_string();
            if let Err(err) = publisher.publish(event).await {
                warn!(event_type = %event_type, error = %err, "event dispatch failed, commit skipped");
                return Err(DbError::dispatch(format!("{event_type}: {err}")));
            }
        }
        debug!(count, "events dispatched");
        Ok(())
    }
}
