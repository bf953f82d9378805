//! 内存版行存储
//!
//! 适用于测试与示例。提交时先复制被触及的表，在副本上应用全部变更，
//! 全部成功后再整体替换，因此失败的提交不会留下部分写入。
//! 不支持原生 SQL。

use super::{CommitOutcome, Row, RowChange, Store};
use crate::error::{DbError, DbResult};
use crate::sql::RawSql;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tabula_domain::entity::ID_COLUMN;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

impl Table {
    fn insert(&mut self, table: &str, id: Option<i64>, mut row: Row) -> DbResult<i64> {
        let id = match id {
            Some(id) if self.rows.contains_key(&id) => {
                return Err(DbError::persistence(format!(
                    "duplicate key {id} in table {table}"
                )));
            }
            Some(id) => id,
            None => self.next_id,
        };
        self.next_id = self.next_id.max(id + 1);
        row.insert(ID_COLUMN.to_string(), Value::from(id));
        self.rows.insert(id, row);
        Ok(id)
    }

    fn update(&mut self, table: &str, id: i64, columns: Row) -> DbResult<()> {
        let row = self.rows.get_mut(&id).ok_or_else(|| {
            DbError::persistence(format!(
                "update affected no rows: key {id} not found in table {table}"
            ))
        })?;
        for (column, value) in columns {
            if column != ID_COLUMN {
                row.insert(column, value);
            }
        }
        Ok(())
    }

    fn delete(&mut self, table: &str, id: i64) -> DbResult<()> {
        self.rows.remove(&id).map(|_| ()).ok_or_else(|| {
            DbError::persistence(format!(
                "delete affected no rows: key {id} not found in table {table}"
            ))
        })
    }
}

/// 进程内行存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 表中的行数，表不存在时为 `None`
    pub async fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.read().await.get(table).map(|t| t.rows.len())
    }
}

fn missing_table(table: &str) -> DbError {
    DbError::persistence(format!("no such table: {table}"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ensure_created(&self, tables: &[&'static str]) -> DbResult<()> {
        let mut guard = self.tables.write().await;
        for table in tables {
            guard.entry((*table).to_string()).or_default();
        }
        Ok(())
    }

    async fn fetch(&self, table: &str, id: i64) -> DbResult<Option<Row>> {
        let guard = self.tables.read().await;
        let t = guard.get(table).ok_or_else(|| missing_table(table))?;
        Ok(t.rows.get(&id).cloned())
    }

    async fn fetch_all(&self, table: &str) -> DbResult<Vec<Row>> {
        let guard = self.tables.read().await;
        let t = guard.get(table).ok_or_else(|| missing_table(table))?;
        Ok(t.rows.values().cloned().collect())
    }

    async fn commit(&self, changes: Vec<RowChange>) -> DbResult<CommitOutcome> {
        let mut guard = self.tables.write().await;

        // 只复制本次提交触及的表
        let mut staged: HashMap<&'static str, Table> = HashMap::new();
        for change in &changes {
            let name = change.table();
            if !staged.contains_key(name) {
                let table = guard.get(name).ok_or_else(|| missing_table(name))?;
                staged.insert(name, table.clone());
            }
        }

        let mut outcome = CommitOutcome::default();
        for change in changes {
            let table_name = change.table();
            let table = staged
                .get_mut(table_name)
                .ok_or_else(|| missing_table(table_name))?;
            match change {
                RowChange::Insert { table: name, id, row } => {
                    let id = table.insert(name, id, row)?;
                    outcome.inserted_ids.push(id);
                }
                RowChange::Update {
                    table: name,
                    id,
                    columns,
                } => table.update(name, id, columns)?,
                RowChange::Delete { table: name, id } => table.delete(name, id)?,
            }
            outcome.affected += 1;
        }

        for (name, table) in staged {
            guard.insert(name.to_string(), table);
        }
        Ok(outcome)
    }

    async fn execute_raw(&self, _sql: &RawSql) -> DbResult<u64> {
        Err(DbError::persistence(
            "raw SQL is not supported by the in-memory store",
        ))
    }
}
