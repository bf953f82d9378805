//! 事件发布（EventPublisher）协议
//!
//! 保存流程对每个收集到的事件调用一次 `publish` 并等待其完成；
//! 处理器如何注册与消费事件不在本协议范围内。
//!
use crate::domain_event::DomainEvent;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use std::sync::Arc;

/// 事件发布者：负责把事件交给下游分发机制
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Arc<dyn DomainEvent>) -> Result<()>;

    /// 按顺序逐个发布，遇到第一个失败即返回
    async fn publish_batch(&self, events: Vec<Arc<dyn DomainEvent>>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> EventPublisher for Arc<T>
where
    T: EventPublisher + ?Sized,
{
    async fn publish(&self, event: Arc<dyn DomainEvent>) -> Result<()> {
        (**self).publish(event).await
    }

    async fn publish_batch(&self, events: Vec<Arc<dyn DomainEvent>>) -> Result<()> {
        (**self).publish_batch(events).await
    }
}
