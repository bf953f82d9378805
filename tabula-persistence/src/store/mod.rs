//! 行存储（Store）协议
//!
//! 实体被序列化为 JSON 对象作为存储行，每种根实体类型对应一张表。
//! 存储只负责按键读取、整表读取、原子提交一批行变更以及执行原生语句，
//! 不感知审计、软删除与事件。
//!
//! 内置实现：
//! - `InMemoryStore`：进程内表，提交时整体替换被触及的表；
//! - `SqliteStore`（feature `sqlite`）：基于 sqlx 连接池，每次提交一个事务。
//!
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::DbResult;
use crate::sql::RawSql;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// 一条存储行（列名 -> 值）
pub type Row = Map<String, Value>;

/// 提交给存储的一条行变更
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// 插入；`id` 为空时由存储生成
    Insert {
        table: &'static str,
        id: Option<i64>,
        row: Row,
    },
    /// 按列合并更新
    Update {
        table: &'static str,
        id: i64,
        columns: Row,
    },
    /// 物理删除
    Delete { table: &'static str, id: i64 },
}

impl RowChange {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// 一次提交的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// 受影响的行数
    pub affected: usize,
    /// 每个 `Insert` 最终使用的标识，顺序与提交中的插入顺序一致
    pub inserted_ids: Vec<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// 确保给定的表存在
    async fn ensure_created(&self, tables: &[&'static str]) -> DbResult<()>;

    /// 按标识读取一行，不应用任何查询过滤
    async fn fetch(&self, table: &str, id: i64) -> DbResult<Option<Row>>;

    /// 读取整表（按标识升序），不应用任何查询过滤
    async fn fetch_all(&self, table: &str) -> DbResult<Vec<Row>>;

    /// 原子地应用一批行变更：要么全部生效，要么全部不生效
    async fn commit(&self, changes: Vec<RowChange>) -> DbResult<CommitOutcome>;

    /// 执行原生语句，返回受影响行数
    async fn execute_raw(&self, sql: &RawSql) -> DbResult<u64>;
}

#[async_trait]
impl<T> Store for std::sync::Arc<T>
where
    T: Store + ?Sized,
{
    async fn ensure_created(&self, tables: &[&'static str]) -> DbResult<()> {
        (**self).ensure_created(tables).await
    }

    async fn fetch(&self, table: &str, id: i64) -> DbResult<Option<Row>> {
        (**self).fetch(table, id).await
    }

    async fn fetch_all(&self, table: &str) -> DbResult<Vec<Row>> {
        (**self).fetch_all(table).await
    }

    async fn commit(&self, changes: Vec<RowChange>) -> DbResult<CommitOutcome> {
        (**self).commit(changes).await
    }

    async fn execute_raw(&self, sql: &RawSql) -> DbResult<u64> {
        (**self).execute_raw(sql).await
    }
}
