//! 审计身份解析
//!
//! 调用者身份由宿主显式设置到 `DbContext` 上（`Actor`），
//! 保存流程据此得到写入审计字段的用户 ID。
//!
use crate::options::DbContextOptions;
use bon::Builder;
use serde::{Deserialize, Serialize};

/// 未启用认证时使用的默认用户 ID
pub const SYSTEM_USER_ID: i64 = 1;

/// 调用者身份声明
#[derive(Builder, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// 用户标识声明，期望为十进制整数
    #[builder(into)]
    name_identifier: Option<String>,
    #[builder(into)]
    name: Option<String>,
}

impl Actor {
    /// 以用户 ID 构造
    pub fn with_user_id(id: i64) -> Self {
        Self::builder().name_identifier(id.to_string()).build()
    }

    pub fn name_identifier(&self) -> Option<&str> {
        self.name_identifier.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// 审计用户解析规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditIdentity {
    authentication_enabled: bool,
    fallback_user_id: i64,
}

impl AuditIdentity {
    pub fn new(authentication_enabled: bool, fallback_user_id: i64) -> Self {
        Self {
            authentication_enabled,
            fallback_user_id,
        }
    }

    pub fn from_options(options: &DbContextOptions) -> Self {
        Self::new(options.authentication_enabled, options.fallback_user_id)
    }

    /// 认证关闭 → 固定用户；开启 → 解析标识声明，缺失或无法解析时为 0
    pub fn resolve(&self, actor: Option<&Actor>) -> i64 {
        if !self.authentication_enabled {
            return self.fallback_user_id;
        }
        actor
            .and_then(Actor::name_identifier)
            .and_then(|claim| claim.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

impl Default for AuditIdentity {
    fn default() -> Self {
        Self::from_options(&DbContextOptions::default())
    }
}
