//! 持久化层统一错误定义
//!
//! 存储、变更跟踪、事件派发与参数校验的失败都归入 `DbError`；
//! 领域层错误通过 `Domain` 变体透传。本层不做重试，也不回滚已完成的内存修改。
//!
use tabula_domain::error::DomainError;
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DbError {
    // --- 存储 ---
    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    // --- 跟踪状态与参数 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("invalid argument: {reason}")]
    Argument { reason: String },

    // --- 事件派发 ---
    #[error("event dispatch error: {reason}")]
    Dispatch { reason: String },

    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl DbError {
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn argument(reason: impl Into<String>) -> Self {
        Self::Argument {
            reason: reason.into(),
        }
    }

    pub fn dispatch(reason: impl Into<String>) -> Self {
        Self::Dispatch {
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
