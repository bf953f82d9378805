#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tabula_domain::domain_event::{DomainEvent, EventMeta};
use tabula_domain::error::{DomainError, DomainResult};
use tabula_domain::eventing::EventPublisher;
use tabula_macros::{domain_event, entity};
use tabula_persistence::{Actor, DbContext, DbContextOptions, InMemoryStore, Model, Store};
use tokio::sync::Mutex;

#[entity(table = "customers", audit, soft_delete, version_tracking)]
pub struct Customer {
    pub name: String,
    pub email: String,
}

// 与 Customer 共用 customers 表
#[entity(table = "vip_customer", audit, soft_delete)]
pub struct VipCustomer {
    pub name: String,
    pub email: String,
    pub tier: i64,
}

#[entity(table = "orders", audit, events)]
pub struct Order {
    pub customer_id: i64,
    pub number: String,
    #[serde(skip)]
    pub lines: Vec<OrderLine>,
    #[serde(skip)]
    pub customer: Option<Customer>,
}

#[entity(table = "order_lines")]
pub struct OrderLine {
    pub order_id: i64,
    pub sku: String,
    pub quantity: i64,
}

#[domain_event(name = "order.placed")]
pub struct OrderPlaced {
    pub number: String,
}

impl OrderPlaced {
    pub fn new(number: &str) -> Self {
        Self {
            meta: EventMeta::new(),
            number: number.to_string(),
        }
    }
}

pub fn customer(name: &str) -> Customer {
    Customer {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        ..Default::default()
    }
}

pub fn order(customer_id: i64, number: &str) -> Order {
    Order {
        customer_id,
        number: number.to_string(),
        ..Default::default()
    }
}

pub fn line(order_id: i64, sku: &str, quantity: i64) -> OrderLine {
    OrderLine {
        order_id,
        sku: sku.to_string(),
        quantity,
        ..Default::default()
    }
}

pub fn model() -> Model {
    Model::builder()
        .entity::<Customer>()
        .derived_entity::<VipCustomer, Customer>()
        .entity::<Order>()
        .entity::<OrderLine>()
        .build()
        .unwrap()
}

/// 记录收到的全部事件
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Arc<dyn DomainEvent>>>,
}

impl RecordingPublisher {
    pub async fn events(&self) -> Vec<Arc<dyn DomainEvent>> {
        self.events.lock().await.clone()
    }

    pub async fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: Arc<dyn DomainEvent>) -> DomainResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// 总是失败的发布者
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _event: Arc<dyn DomainEvent>) -> DomainResult<()> {
        Err(DomainError::event_bus("subscriber unavailable"))
    }
}

/// 在处理事件时经同一上下文读取客户，可选地再登记一条明细或尝试嵌套保存
#[derive(Default)]
pub struct ContextAwarePublisher {
    pub(crate) ctx: OnceLock<DbContext>,
    pub stage_line: bool,
    pub save_inside: bool,
    pub(crate) visible: Mutex<Vec<usize>>,
}

impl ContextAwarePublisher {
    pub fn bind(&self, ctx: DbContext) {
        let _ = self.ctx.set(ctx);
    }

    /// 每次处理事件时读到的客户数
    pub async fn visible(&self) -> Vec<usize> {
        self.visible.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for ContextAwarePublisher {
    async fn publish(&self, _event: Arc<dyn DomainEvent>) -> DomainResult<()> {
        let ctx = self
            .ctx
            .get()
            .ok_or_else(|| DomainError::event_bus("handler is not bound to a context"))?;
        let customers = ctx
            .repository::<Customer>()
            .get_all()
            .await
            .map_err(|e| DomainError::event_bus(e.to_string()))?;
        self.visible.lock().await.push(customers.len());

        if self.stage_line {
            let mut audit_line = line(0, "AUDIT", 1);
            ctx.repository::<OrderLine>()
                .add(&mut audit_line, false)
                .await
                .map_err(|e| DomainError::event_bus(e.to_string()))?;
        }
        if self.save_inside {
            ctx.save_changes(true)
                .await
                .map_err(|e| DomainError::event_bus(e.to_string()))?;
        }
        Ok(())
    }
}

pub async fn context_with(
    store: Arc<dyn Store>,
    publisher: Option<Arc<dyn EventPublisher>>,
    options: DbContextOptions,
) -> DbContext {
    let ctx = DbContext::builder()
        .store(store)
        .model(model())
        .options(options)
        .maybe_publisher(publisher)
        .actor(Actor::with_user_id(7))
        .build();
    ctx.ensure_created().await.unwrap();
    ctx
}

/// 内存存储 + 记录型发布者，当前用户为 7
pub async fn recording_context() -> (DbContext, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = context_with(
        Arc::new(InMemoryStore::new()),
        Some(publisher.clone() as Arc<dyn EventPublisher>),
        DbContextOptions::default(),
    )
    .await;
    (ctx, publisher)
}
