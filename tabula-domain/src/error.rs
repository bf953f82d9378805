//! 领域层统一错误定义
//!
//! 只覆盖实体建模、事件发布与序列化所需的最小集合，
//! 持久化层再将其包装为自己的错误类型。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 事件系统 ---
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event publish error: event_type={event_type}, reason={reason}")]
    EventPublish { event_type: String, reason: String },

    // --- 实体状态与参数 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

impl DomainError {
    pub fn event_bus(reason: impl Into<String>) -> Self {
        Self::EventBus {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
