//! 数据访问层的领域基础库（tabula-domain）
//!
//! 提供实体建模所需的通用抽象与构件：
//! - 实体（`entity`）与显式能力集：审计、软删除、版本跟踪、事件缓冲；
//! - 审计字段块（`audit`）；
//! - 领域事件（`domain_event`）及实体上的待派发缓冲区；
//! - 规约（`specification`），用于组合查询条件；
//! - 事件发布（`eventing`）：发布协议与内存总线。
//!
//! 本 crate 不关心存储与变更跟踪，具体的保存流程、仓储与工作单元
//! 由 `tabula-persistence` 在这些抽象之上实现。
//!
//! 典型用法：
//! 1. 使用 `#[entity(table = "...", audit, soft_delete)]` 声明实体及其能力；
//! 2. 在业务方法中通过 `DomainEvents::raise` 挂载领域事件；
//! 3. 交由持久化层保存，事件在保存时被收集并发布。
//!
pub mod audit;
pub mod domain_event;
pub mod entity;
pub mod error;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod specification;

// 允许在本 crate 内部通过 ::tabula_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::tabula_domain 路径。
extern crate self as tabula_domain;

// 过程宏生成的代码通过该路径引用 chrono，调用方无需直接依赖
#[doc(hidden)]
pub use chrono;
