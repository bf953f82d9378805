//! 实体（Entity）与能力（Capability）抽象
//!
//! 一个实体由唯一标识加上一组显式声明的能力组成：
//! - `Auditable`：带审计字段，由保存流程写入创建/修改信息；
//! - `SoftDelete`：删除请求被改写为设置删除标记；
//! - 版本跟踪：每次持久化变更都会产生 `EntityChangedEvent`；
//! - `HasDomainEvents`：实体持有待派发的领域事件缓冲区。
//!
//! 能力在编译期通过 trait 方法声明，持久化层据此分派，不依赖运行时反射。
//! 通常使用 `#[entity(...)]` 宏生成这些实现。
//!
use crate::audit::AuditInfo;
use crate::domain_event::DomainEvents;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

/// 软删除标记在存储行中的列名
pub const SOFT_DELETE_COLUMN: &str = "is_deleted";

/// 标识列名
pub const ID_COLUMN: &str = "id";

/// 实体声明的能力集合
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    audit: bool,
    soft_delete: bool,
    version_tracking: bool,
    domain_events: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities::new(false, false, false, false);

    pub const fn new(
        audit: bool,
        soft_delete: bool,
        version_tracking: bool,
        domain_events: bool,
    ) -> Self {
        Self {
            audit,
            soft_delete,
            version_tracking,
            domain_events,
        }
    }

    pub const fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    pub const fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    /// 版本跟踪依赖事件缓冲区，因此同时开启 domain_events
    pub const fn with_version_tracking(mut self) -> Self {
        self.version_tracking = true;
        self.domain_events = true;
        self
    }

    pub const fn with_domain_events(mut self) -> Self {
        self.domain_events = true;
        self
    }

    pub const fn audit(&self) -> bool {
        self.audit
    }

    pub const fn soft_delete(&self) -> bool {
        self.soft_delete
    }

    pub const fn version_tracking(&self) -> bool {
        self.version_tracking
    }

    pub const fn domain_events(&self) -> bool {
        self.domain_events
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.audit {
            names.push("audit");
        }
        if self.soft_delete {
            names.push("soft_delete");
        }
        if self.version_tracking {
            names.push("version_tracking");
        }
        if self.domain_events {
            names.push("domain_events");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// 带审计字段的实体
pub trait Auditable {
    fn audit_info(&self) -> &AuditInfo;

    fn audit_info_mut(&mut self) -> &mut AuditInfo;
}

/// 支持软删除的实体
pub trait SoftDelete {
    fn is_deleted(&self) -> bool;

    fn set_deleted(&mut self, deleted: bool);
}

/// 持有领域事件缓冲区的实体
pub trait HasDomainEvents {
    fn domain_events(&self) -> &DomainEvents;

    fn domain_events_mut(&mut self) -> &mut DomainEvents;
}

/// 可持久化实体
///
/// 标识由存储生成：`0` 表示尚未分配，负数为变更跟踪器分配的临时键，
/// 首次提交后替换为存储生成的正数标识。
pub trait Entity:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 实体类型名，同时作为默认表名
    const TYPE: &'static str;

    /// 实体声明的能力
    const CAPABILITIES: Capabilities = Capabilities::NONE;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// 标识是否已由存储生成
    fn has_store_id(&self) -> bool {
        self.id() > 0
    }

    fn as_auditable(&self) -> Option<&dyn Auditable> {
        None
    }

    fn as_auditable_mut(&mut self) -> Option<&mut dyn Auditable> {
        None
    }

    fn as_soft_delete(&self) -> Option<&dyn SoftDelete> {
        None
    }

    fn as_soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        None
    }

    fn as_event_source(&self) -> Option<&dyn HasDomainEvents> {
        None
    }

    fn as_event_source_mut(&mut self) -> Option<&mut dyn HasDomainEvents> {
        None
    }
}
