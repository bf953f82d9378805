//! 内存事件总线（InMemoryEventBus）
//!
//! 保存流程发布的事件经 `tokio::sync::broadcast` 转发给所有订阅者。
//! 订阅流为 `'static`，可直接移入 `tokio::spawn`；`subscribe_to` 只接收指定类型的事件。
//!
//! 投递为至多一次：发布时没有订阅者则事件被丢弃，
//! 落后超过缓冲区容量的订阅者会收到一次 `EventBus` 错误，随后从最新位置继续。

use crate::domain_event::DomainEvent;
use crate::error::{DomainError, DomainResult};
use crate::eventing::EventPublisher;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, future};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

type EventStream = BoxStream<'static, DomainResult<Arc<dyn DomainEvent>>>;

#[derive(Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Arc<dyn DomainEvent>>,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> EventStream {
        let stream = BroadcastStream::new(self.sender.subscribe()).map(|received| {
            received.map_err(|err| DomainError::event_bus(format!("subscriber {err}")))
        });
        Box::pin(stream)
    }

    /// 只订阅 `event_type` 类型的事件（错误照常传递）
    pub fn subscribe_to(&self, event_type: impl Into<String>) -> EventStream {
        let wanted = event_type.into();
        let stream = self.subscribe().filter(move |item| {
            future::ready(match item {
                Ok(event) => event.event_type() == wanted,
                Err(_) => true,
            })
        });
        Box::pin(stream)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: Arc<dyn DomainEvent>) -> DomainResult<()> {
        // 没有订阅者时 send 返回错误，事件直接丢弃
        let _ = self.sender.send(event);
        Ok(())
    }
}
