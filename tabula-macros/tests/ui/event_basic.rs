use std::sync::Arc;
use tabula_domain::domain_event::{DomainEvent, EventMeta};
use tabula_macros::domain_event;

#[domain_event(name = "order.placed")]
struct OrderPlaced {
    order_id: i64,
}

#[domain_event]
struct OrderCancelled {
    meta: EventMeta,
    reason: String,
}

fn main() {
    let placed = OrderPlaced {
        meta: EventMeta::new(),
        order_id: 9,
    };
    assert_eq!(placed.event_type(), "order.placed");
    assert_eq!(OrderPlaced::EVENT_TYPE, "order.placed");
    assert!(placed.event_id() > 0);

    let cancelled = OrderCancelled {
        meta: EventMeta::default(),
        reason: "out of stock".into(),
    };
    assert_eq!(cancelled.event_type(), "OrderCancelled");

    let erased: Arc<dyn DomainEvent> = Arc::new(placed.clone());
    assert_eq!(erased.downcast_ref::<OrderPlaced>().map(|e| e.order_id), Some(9));
    assert!(!erased.is::<OrderCancelled>());
    assert!(!cancelled.reason.is_empty());
}
