/// 实体事件缓冲区与内存总线示例
/// 展示实体上挂载事件、取走事件并通过 InMemoryEventBus 广播给订阅者
use futures_util::StreamExt;
use tabula_domain::domain_event::{DomainEvent, EntityChangedEvent, EventMeta};
use tabula_domain::entity::Entity;
use tabula_domain::error::DomainResult;
use tabula_domain::eventing::{EventPublisher, InMemoryEventBus};
use tabula_macros::{domain_event, entity};

#[entity(table = "tickets", audit, version_tracking)]
struct Ticket {
    title: String,
    closed: bool,
}

#[domain_event(name = "ticket.closed")]
struct TicketClosed {
    ticket_id: i64,
}

impl Ticket {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.domain_events.raise(TicketClosed {
            meta: EventMeta::new(),
            ticket_id: self.id,
        });
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> DomainResult<()> {
    let bus = InMemoryEventBus::new(16);
    let mut stream = bus.subscribe();

    let mut ticket = Ticket {
        id: 1,
        title: "printer on fire".into(),
        ..Default::default()
    };
    println!("capabilities: {}", Ticket::CAPABILITIES);

    ticket.close();
    ticket.close();
    let snapshot = ticket.clone();
    ticket
        .domain_events
        .raise(EntityChangedEvent::new(snapshot));

    let pending = ticket.domain_events.take();
    println!("pending events: {}", pending.len());
    bus.publish_batch(pending).await?;
    assert!(ticket.domain_events.is_empty());

    for _ in 0..2 {
        if let Some(event) = stream.next().await {
            let event = event?;
            match event.downcast_ref::<TicketClosed>() {
                Some(closed) => println!("{} -> ticket {}", event.event_type(), closed.ticket_id),
                None => println!("{} #{}", event.event_type(), event.event_id()),
            }
        }
    }
    Ok(())
}
