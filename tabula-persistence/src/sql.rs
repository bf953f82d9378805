//! 原生 SQL 语句（RawSql）
//!
//! 绕过变更跟踪直接交给存储执行：不写审计字段，不产生事件。
//! 参数以位置占位符 `?` 绑定，插值模板中的 `{}` 会被替换为占位符，
//! 值本身永远不会拼接进 SQL 文本。
//!
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 绑定参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T> From<Option<T>> for SqlParam
where
    T: Into<SqlParam>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// 一条原生语句及其参数
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    sql: String,
    params: Vec<SqlParam>,
}

impl RawSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// 追加一个位置参数
    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// 由插值模板构造：每个 `{}` 对应一个参数，`{{`/`}}` 转义为字面量花括号
    pub fn interpolated(template: &str, params: Vec<SqlParam>) -> DbResult<Self> {
        let mut sql = String::with_capacity(template.len());
        let mut holes = 0usize;
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match (ch, chars.peek()) {
                ('{', Some('{')) => {
                    chars.next();
                    sql.push('{');
                }
                ('}', Some('}')) => {
                    chars.next();
                    sql.push('}');
                }
                ('{', Some('}')) => {
                    chars.next();
                    sql.push('?');
                    holes += 1;
                }
                ('{', _) | ('}', _) => {
                    return Err(DbError::argument(format!(
                        "unbalanced brace in sql template: {template}"
                    )));
                }
                (c, _) => sql.push(c),
            }
        }

        if holes != params.len() {
            return Err(DbError::argument(format!(
                "sql template expects {holes} parameter(s), got {}",
                params.len()
            )));
        }

        Ok(Self { sql, params })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

impl fmt::Display for RawSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} param(s)]", self.sql, self.params.len())
    }
}

/// 以插值形式构造 `RawSql`：`sql_interpolated!("DELETE FROM t WHERE id = {}", id)`
#[macro_export]
macro_rules! sql_interpolated {
    ($template:literal $(, $arg:expr)* $(,)?) => {
        $crate::sql::RawSql::interpolated(
            $template,
            ::std::vec![$($crate::sql::SqlParam::from($arg)),*],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_replaces_holes_with_placeholders() {
        let raw = RawSql::interpolated(
            "UPDATE t SET body = json_set(body, '$.n', {}) WHERE id = {}",
            vec![SqlParam::from("x"), SqlParam::from(3i64)],
        )
        .unwrap();
        assert_eq!(
            raw.sql(),
            "UPDATE t SET body = json_set(body, '$.n', ?) WHERE id = ?"
        );
        assert_eq!(raw.params(), &[SqlParam::Text("x".into()), SqlParam::Int(3)]);
    }

    #[test]
    fn escaped_braces_are_kept_literal() {
        let raw = RawSql::interpolated("SELECT '{{}}' WHERE 1 = {}", vec![1i64.into()]).unwrap();
        assert_eq!(raw.sql(), "SELECT '{}' WHERE 1 = ?");
    }

    #[test]
    fn parameter_count_must_match() {
        let err = RawSql::interpolated("DELETE FROM t WHERE id = {}", vec![]).unwrap_err();
        assert!(matches!(err, DbError::Argument { .. }));

        let err = sql_interpolated!("DELETE FROM t", 1i64).unwrap_err();
        assert!(matches!(err, DbError::Argument { .. }));
    }

    #[test]
    fn macro_and_bind_build_the_same_statement() {
        let name: Option<&str> = None;
        let a = sql_interpolated!("UPDATE t SET a = {}, b = {} WHERE id = {}", true, name, 7i64)
            .unwrap();
        let b = RawSql::new("UPDATE t SET a = ?, b = ? WHERE id = ?")
            .bind(true)
            .bind(SqlParam::Null)
            .bind(7i64);
        assert_eq!(a, b);
    }
}
