//! SQLite 行存储
//!
//! 每张表的结构固定为 `(id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)`，
//! `body` 保存去掉标识列后的 JSON 文档。一次提交对应一个事务。

use super::{CommitOutcome, Row, RowChange, Store};
use crate::error::{DbError, DbResult};
use crate::options::SqliteStoreConfig;
use crate::sql::{RawSql, SqlParam};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::str::FromStr;
use tabula_domain::entity::ID_COLUMN;
use tracing::debug;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 按配置建立连接池
    ///
    /// 内存数据库每个连接都是独立的库，因此连接不做空闲回收。
    pub async fn connect(config: &SqliteStoreConfig) -> DbResult<Self> {
        let options =
            SqliteConnectOptions::from_str(config.url())?.create_if_missing(config.create_if_missing());
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections())
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        debug!(url = config.url(), "sqlite store connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// 表名来自实体类型名，这里只允许标识符字符
fn quote_table(table: &str) -> DbResult<String> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{table}\""))
    } else {
        Err(DbError::argument(format!("invalid table name: {table}")))
    }
}

fn encode_body(mut row: Row) -> DbResult<String> {
    row.remove(ID_COLUMN);
    Ok(serde_json::to_string(&row)?)
}

fn decode_row(id: i64, body: &str) -> DbResult<Row> {
    let mut row: Row = serde_json::from_str(body)?;
    row.insert(ID_COLUMN.to_string(), Value::from(id));
    Ok(row)
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_created(&self, tables: &[&'static str]) -> DbResult<()> {
        for table in tables {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)",
                quote_table(table)?
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch(&self, table: &str, id: i64) -> DbResult<Option<Row>> {
        let sql = format!("SELECT id, body FROM {} WHERE id = ?", quote_table(table)?);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(decode_row(id, &body)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_all(&self, table: &str) -> DbResult<Vec<Row>> {
        let sql = format!("SELECT id, body FROM {} ORDER BY id", quote_table(table)?);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let body: String = row.try_get("body")?;
                decode_row(id, &body)
            })
            .collect()
    }

    async fn commit(&self, changes: Vec<RowChange>) -> DbResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = CommitOutcome::default();

        for change in changes {
            match change {
                RowChange::Insert { table, id, row } => {
                    let body = encode_body(row)?;
                    let table = quote_table(table)?;
                    let result = match id {
                        Some(id) => {
                            let sql = format!("INSERT INTO {table} (id, body) VALUES (?, ?)");
                            sqlx::query(&sql).bind(id).bind(body).execute(&mut *tx).await?
                        }
                        None => {
                            let sql = format!("INSERT INTO {table} (body) VALUES (?)");
                            sqlx::query(&sql).bind(body).execute(&mut *tx).await?
                        }
                    };
                    outcome.inserted_ids.push(result.last_insert_rowid());
                }
                RowChange::Update { table, id, columns } => {
                    let quoted = quote_table(table)?;
                    let select = format!("SELECT body FROM {quoted} WHERE id = ?");
                    let existing = sqlx::query(&select)
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| {
                            DbError::persistence(format!(
                                "update affected no rows: key {id} not found in table {table}"
                            ))
                        })?;
                    let body: String = existing.try_get("body")?;
                    let mut row = decode_row(id, &body)?;
                    for (column, value) in columns {
                        row.insert(column, value);
                    }
                    let update = format!("UPDATE {quoted} SET body = ? WHERE id = ?");
                    sqlx::query(&update)
                        .bind(encode_body(row)?)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                RowChange::Delete { table, id } => {
                    let sql = format!("DELETE FROM {} WHERE id = ?", quote_table(table)?);
                    let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::persistence(format!(
                            "delete affected no rows: key {id} not found in table {table}"
                        )));
                    }
                }
            }
            outcome.affected += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn execute_raw(&self, sql: &RawSql) -> DbResult<u64> {
        let mut query = sqlx::query(sql.sql());
        for param in sql.params() {
            query = match param {
                SqlParam::Null => query.bind(None::<i64>),
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Real(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
                SqlParam::Bool(v) => query.bind(*v),
            };
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
