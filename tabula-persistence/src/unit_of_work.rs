//! 工作单元（UnitOfWork）
//!
//! 对一个数据上下文的事务性封装：提交全部跟踪中的变更、
//! 以存储中的值回滚跟踪状态，以及绕过跟踪器直接执行原生语句。
//!
use crate::context::DbContext;
use crate::error::DbResult;
use crate::repository::Repository;
use crate::sql::RawSql;
use tabula_domain::entity::Entity;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct UnitOfWork {
    ctx: DbContext,
}

impl UnitOfWork {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &DbContext {
        &self.ctx
    }

    pub fn repository<E: Entity>(&self) -> Repository<E> {
        self.ctx.repository()
    }

    /// 无条件执行保存流程
    pub async fn commit(&self) -> DbResult<usize> {
        self.ctx.save_changes(true).await
    }

    /// 逐个按标识从存储重新加载跟踪中的实体（不受全局过滤器约束）
    ///
    /// 存储中存在的实体恢复为未修改状态；不存在的（例如尚未提交的新增）脱离跟踪。
    pub async fn rollback(&self) -> DbResult<()> {
        let mut state = self.ctx.lock().await;
        let keys = state.tracker.keys();
        let total = keys.len();
        let mut detached = 0;
        for (seq, table, key) in keys {
            let row = if key > 0 {
                self.ctx.store().fetch(table, key).await?
            } else {
                None
            };
            if row.is_none() {
                detached += 1;
            }
            state.tracker.reload(seq, row)?;
        }
        info!(reloaded = total - detached, detached, "unit of work rolled back");
        Ok(())
    }

    /// 执行原生语句，返回受影响行数
    pub async fn execute_sql_raw(&self, sql: &str) -> DbResult<u64> {
        self.execute_sql_interpolated(RawSql::new(sql)).await
    }

    /// 执行参数化语句，返回受影响行数；不经过审计、软删除与事件
    pub async fn execute_sql_interpolated(&self, sql: RawSql) -> DbResult<u64> {
        debug!(sql = sql.sql(), params = sql.params().len(), "executing raw sql");
        self.ctx.store().execute_raw(&sql).await
    }
}

impl From<DbContext> for UnitOfWork {
    fn from(ctx: DbContext) -> Self {
        Self::new(ctx)
    }
}
