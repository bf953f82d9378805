//! 事件子系统（eventing）
//!
//! - `EventPublisher`：保存流程使用的发布接口；
//! - `InMemoryEventBus`：基于 broadcast 的内存实现，可订阅事件流。
//!
pub mod bus;
pub mod bus_inmemory;

pub use bus::EventPublisher;
pub use bus_inmemory::InMemoryEventBus;
