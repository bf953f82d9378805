//! 通用数据访问层（tabula-persistence）
//!
//! 在 `tabula-domain` 的实体抽象之上提供：
//! - 变更跟踪器（`tracker`）：快照比较、临时标识、身份解析；
//! - 数据上下文（`context`）与保存流程：审计信息写入、软删除改写、
//!   版本跟踪事件、提交前的事件发布；
//! - 泛型仓储（`repository`）、可组合查询（`query`）与导航加载（`include`）；
//! - 工作单元（`unit_of_work`）：提交、回滚与原生语句；
//! - 模型配置（`model`）：实体到表的映射与软删除全局过滤器；
//! - 行存储协议（`store`）及内存、SQLite 两种实现。
//!
//! 典型用法：
//! ```ignore
//! let model = Model::builder().entity::<Customer>().build()?;
//! let ctx = DbContext::builder()
//!     .store(Arc::new(InMemoryStore::new()))
//!     .model(model)
//!     .actor(Actor::with_user_id(7))
//!     .build();
//! ctx.ensure_created().await?;
//!
//! let customers = ctx.repository::<Customer>();
//! customers.add(&mut customer, true).await?;
//! ```
//!
pub mod context;
pub mod error;
pub mod identity;
pub mod include;
pub mod model;
pub mod options;
pub mod query;
pub mod repository;
pub mod sql;
pub mod store;
pub mod tracker;
pub mod unit_of_work;

pub use context::DbContext;
pub use error::{DbError, DbResult};
pub use identity::{Actor, AuditIdentity, SYSTEM_USER_ID};
pub use include::{BelongsTo, HasMany, Include};
pub use model::{DISCRIMINATOR_COLUMN, EntityMapping, Model, ModelBuilder};
pub use options::{DbContextOptions, SqliteStoreConfig};
pub use query::Query;
pub use repository::Repository;
pub use sql::{RawSql, SqlParam};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{CommitOutcome, InMemoryStore, Row, RowChange, Store};
pub use tracker::{ChangeTracker, EntityState, ModifiedColumns};
pub use unit_of_work::UnitOfWork;
