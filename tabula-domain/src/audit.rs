//! 审计信息（Audit）
//!
//! 记录“谁在何时创建/最后修改”了一条记录。字段只由持久化层的保存流程写入，
//! 调用方不应直接修改。
//!
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 审计字段块，通过 `#[serde(flatten)]` 平铺到实体的存储行中
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// 创建者 ID（首次持久化时写入）
    #[serde(default)]
    pub created_by: Option<i64>,
    /// 创建时间（本地时间）
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    /// 最后修改者 ID（每次更新时写入，创建时不写）
    #[serde(default)]
    pub last_modified_by: Option<i64>,
    /// 最后修改时间（本地时间）
    #[serde(default)]
    pub last_modified_at: Option<NaiveDateTime>,
}

impl AuditInfo {
    /// 创建相关的列名
    pub const CREATED_COLUMNS: [&'static str; 2] = ["created_by", "created_at"];
    /// 修改相关的列名
    pub const MODIFIED_COLUMNS: [&'static str; 2] = ["last_modified_by", "last_modified_at"];

    pub fn created_by(&self) -> Option<i64> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.created_at
    }

    pub fn last_modified_by(&self) -> Option<i64> {
        self.last_modified_by
    }

    pub fn last_modified_at(&self) -> Option<NaiveDateTime> {
        self.last_modified_at
    }

    /// 标记为已创建
    pub fn stamp_created(&mut self, user_id: i64, at: NaiveDateTime) {
        self.created_by = Some(user_id);
        self.created_at = Some(at);
    }

    /// 标记为已修改
    pub fn stamp_modified(&mut self, user_id: i64, at: NaiveDateTime) {
        self.last_modified_by = Some(user_id);
        self.last_modified_at = Some(at);
    }

    /// 是否从未被持久化过
    pub fn is_new(&self) -> bool {
        self.created_at.is_none()
    }
}
