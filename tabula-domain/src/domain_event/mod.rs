//! 领域事件（Domain Event）与事件缓冲区
//!
//! 定义事件需要实现的最小接口（`DomainEvent`）、事件元数据（`EventMeta`）、
//! 内置的实体变更通知（`EntityChangedEvent`），以及实体持有的事件缓冲区
//! （`DomainEvents`）。

mod domain_event_trait;
mod domain_events;
mod entity_changed;
mod event_meta;

pub use domain_event_trait::DomainEvent;
pub use domain_events::DomainEvents;
pub use entity_changed::EntityChangedEvent;
pub use event_meta::EventMeta;
