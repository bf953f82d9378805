use super::domain_event_trait::DomainEvent;
use super::event_meta::EventMeta;
use crate::entity::Entity;
use chrono::{DateTime, Utc};
use std::any::Any;

/// 实体变更通知：版本跟踪实体每次产生持久化变更时，由保存流程生成并挂到实体上
#[derive(Debug, Clone)]
pub struct EntityChangedEvent<E>
where
    E: Entity,
{
    meta: EventMeta,
    data: E,
}

impl<E> EntityChangedEvent<E>
where
    E: Entity,
{
    pub const EVENT_TYPE: &'static str = "EntityChanged";

    pub fn new(data: E) -> Self {
        Self {
            meta: EventMeta::new(),
            data,
        }
    }

    /// 变更发生时的实体快照
    pub fn data(&self) -> &E {
        &self.data
    }

    pub fn entity_type(&self) -> &'static str {
        E::TYPE
    }

    pub fn into_data(self) -> E {
        self.data
    }
}

impl<E> DomainEvent for EntityChangedEvent<E>
where
    E: Entity,
{
    fn event_id(&self) -> i64 {
        self.meta.event_id()
    }

    fn event_type(&self) -> &str {
        Self::EVENT_TYPE
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.meta.occurred_at()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
