mod common;

use common::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tabula_domain::domain_event::EntityChangedEvent;
use tabula_domain::eventing::EventPublisher;
use tabula_persistence::{DbContext, DbContextOptions, DbError, EntityState, InMemoryStore, Store};
use tokio::time::timeout;

#[tokio::test]
async fn insert_sets_created_fields_only() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut alice = customer("Alice");
    assert_eq!(repo.add(&mut alice, true).await.unwrap(), 1);

    assert!(alice.id > 0);
    assert_eq!(alice.audit.created_by(), Some(7));
    assert!(alice.audit.created_at().is_some());
    assert_eq!(alice.audit.last_modified_by(), None);
    assert_eq!(alice.audit.last_modified_at(), None);

    let stored = repo.get_no_tracking(alice.id).await.unwrap().unwrap();
    assert_eq!(stored.audit, alice.audit);
    assert_eq!(ctx.entry_state::<Customer>(alice.id).await.unwrap(), EntityState::Unchanged);
}

#[tokio::test]
async fn update_sets_last_modified_and_never_rewrites_created() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut bob = customer("Bob");
    repo.add(&mut bob, true).await.unwrap();
    let created = bob.audit.clone();

    ctx.set_actor(Some(tabula_persistence::Actor::with_user_id(8))).await;
    bob.email = "bob@work.example".into();
    // 调用方篡改的创建信息不会写入存储
    bob.audit.created_by = Some(999);
    repo.update(&mut bob, true).await.unwrap();

    let stored = repo.get_no_tracking(bob.id).await.unwrap().unwrap();
    assert_eq!(stored.email, "bob@work.example");
    assert_eq!(stored.audit.created_by(), created.created_by());
    assert_eq!(stored.audit.created_at(), created.created_at());
    assert_eq!(stored.audit.last_modified_by(), Some(8));
    assert!(stored.audit.last_modified_at().is_some());
}

#[tokio::test]
async fn sequential_updates_advance_last_modified() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut carol = customer("Carol");
    repo.add(&mut carol, true).await.unwrap();

    carol.name = "Carol A".into();
    repo.update(&mut carol, true).await.unwrap();
    let first = carol.audit.last_modified_at().unwrap();

    carol.name = "Carol B".into();
    repo.update(&mut carol, true).await.unwrap();
    let second = carol.audit.last_modified_at().unwrap();

    assert!(second >= first);
    let stored = repo.get_no_tracking(carol.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Carol B");
}

#[tokio::test]
async fn soft_delete_keeps_the_row_and_hides_it() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut dave = customer("Dave");
    let mut erin = customer("Erin");
    repo.add(&mut dave, true).await.unwrap();
    repo.add(&mut erin, true).await.unwrap();

    repo.delete(&dave, true).await.unwrap();

    let visible = repo.get_all_no_tracking().await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "Erin");
    assert!(repo.get(dave.id).await.unwrap().is_none());

    // 直接读取存储时不经过全局过滤器
    let rows = ctx.store().fetch_all("customers").await.unwrap();
    assert_eq!(rows.len(), 2);
    let flagged = rows
        .iter()
        .find(|r| r.get("id") == Some(&Value::from(dave.id)))
        .unwrap();
    assert_eq!(flagged.get("is_deleted"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn hard_delete_removes_the_row() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<OrderLine>();

    let mut l = line(1, "SKU-1", 2);
    repo.add(&mut l, true).await.unwrap();
    assert_eq!(repo.delete(&l, true).await.unwrap(), 1);

    assert!(ctx.store().fetch("order_lines", l.id).await.unwrap().is_none());
    assert_eq!(ctx.tracked_count().await, 0);
}

#[tokio::test]
async fn deleting_a_pending_add_only_detaches_it() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<OrderLine>();

    let mut l = line(1, "SKU-1", 2);
    repo.add(&mut l, false).await.unwrap();
    repo.delete(&l, true).await.unwrap();

    assert_eq!(ctx.tracked_count().await, 0);
    assert!(ctx.store().fetch_all("order_lines").await.unwrap().is_empty());
}

#[tokio::test]
async fn version_tracked_changes_raise_entity_changed_events() {
    let (ctx, publisher) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut frank = customer("Frank");
    repo.add(&mut frank, true).await.unwrap();
    assert_eq!(publisher.event_types().await, vec!["EntityChanged"]);

    let events = publisher.events().await;
    let changed = events[0]
        .downcast_ref::<EntityChangedEvent<Customer>>()
        .unwrap();
    assert_eq!(changed.data().name, "Frank");
    assert_eq!(changed.entity_type(), "customers");
    assert!(frank.domain_events.is_empty());

    frank.email = "frank@new.example".into();
    repo.update(&mut frank, true).await.unwrap();
    assert_eq!(publisher.count().await, 2);
}

#[tokio::test]
async fn second_save_without_changes_dispatches_nothing() {
    let (ctx, publisher) = recording_context().await;
    let repo = ctx.repository::<Order>();

    let mut o = order(1, "SO-1");
    o.domain_events.raise(OrderPlaced::new("SO-1"));
    repo.add(&mut o, true).await.unwrap();
    assert_eq!(publisher.event_types().await, vec!["order.placed"]);
    assert!(o.domain_events.is_initialized());
    assert!(o.domain_events.is_empty());

    assert_eq!(ctx.save_changes(true).await.unwrap(), 0);
    assert_eq!(publisher.count().await, 1);
}

#[tokio::test]
async fn deferred_saves_persist_and_dispatch_nothing_until_committed() {
    let (ctx, publisher) = recording_context().await;
    let orders = ctx.repository::<Order>();
    let customers = ctx.repository::<Customer>();

    let mut c = customer("Grace");
    customers.add(&mut c, false).await.unwrap();
    let mut o = order(0, "SO-2");
    o.domain_events.raise(OrderPlaced::new("SO-2"));
    orders.add(&mut o, false).await.unwrap();

    assert_eq!(ctx.save_changes(false).await.unwrap(), 0);
    assert_eq!(publisher.count().await, 0);
    assert!(ctx.store().fetch_all("orders").await.unwrap().is_empty());
    assert!(c.id < 0 && o.id < 0);

    assert_eq!(ctx.save_changes(true).await.unwrap(), 2);
    // 事件按跟踪顺序派发
    assert_eq!(
        publisher.event_types().await,
        vec!["EntityChanged", "order.placed"]
    );
    assert_eq!(ctx.store().fetch_all("orders").await.unwrap().len(), 1);
}

#[tokio::test]
async fn dispatch_failure_skips_the_commit() {
    let publisher: Arc<dyn EventPublisher> = Arc::new(FailingPublisher);
    let ctx = context_with(
        Arc::new(InMemoryStore::new()),
        Some(publisher),
        DbContextOptions::default(),
    )
    .await;
    let repo = ctx.repository::<Customer>();

    let mut h = customer("Heidi");
    let err = repo.add(&mut h, true).await.unwrap_err();
    assert!(matches!(err, DbError::Dispatch { .. }));
    assert!(err.to_string().contains("EntityChanged"));

    assert!(ctx.store().fetch_all("customers").await.unwrap().is_empty());
    // 已写入的审计信息不会被撤销
    assert_eq!(h.audit.created_by(), Some(7));
    assert_eq!(ctx.entry_state::<Customer>(h.id).await.unwrap(), EntityState::Added);
}

async fn context_aware(publisher: ContextAwarePublisher) -> (DbContext, Arc<ContextAwarePublisher>) {
    let publisher = Arc::new(publisher);
    let ctx = context_with(
        Arc::new(InMemoryStore::new()),
        Some(publisher.clone() as Arc<dyn EventPublisher>),
        DbContextOptions::default(),
    )
    .await;
    publisher.bind(ctx.clone());
    (ctx, publisher)
}

#[tokio::test]
async fn handlers_can_use_the_context_during_dispatch() {
    let (ctx, publisher) = context_aware(ContextAwarePublisher {
        stage_line: true,
        ..Default::default()
    })
    .await;

    let mut c = customer("Ivan");
    let affected = timeout(Duration::from_secs(3), ctx.repository::<Customer>().add(&mut c, true))
        .await
        .expect("save finished")
        .unwrap();

    // 处理器读取时客户尚未提交；它登记的明细随同一次提交写入
    assert_eq!(publisher.visible().await, vec![0]);
    assert_eq!(affected, 2);
    assert!(c.id > 0);
    assert_eq!(ctx.store().fetch_all("customers").await.unwrap().len(), 1);
    assert_eq!(ctx.store().fetch_all("order_lines").await.unwrap().len(), 1);
}

#[tokio::test]
async fn saving_from_inside_a_handler_is_rejected() {
    let (ctx, _) = context_aware(ContextAwarePublisher {
        save_inside: true,
        ..Default::default()
    })
    .await;

    let mut c = customer("Judy");
    let err = timeout(Duration::from_secs(3), ctx.repository::<Customer>().add(&mut c, true))
        .await
        .expect("save finished")
        .unwrap_err();
    assert!(matches!(err, DbError::Dispatch { .. }));
    assert!(ctx.store().fetch_all("customers").await.unwrap().is_empty());
    assert_eq!(ctx.entry_state::<Customer>(c.id).await.unwrap(), EntityState::Added);
}

#[tokio::test]
async fn disabled_publishing_drops_events_and_commits() {
    let publisher = Arc::new(RecordingPublisher::default());
    let options = DbContextOptions::builder().publish_events(false).build();
    let ctx = context_with(
        Arc::new(InMemoryStore::new()),
        Some(publisher.clone() as Arc<dyn EventPublisher>),
        options,
    )
    .await;

    let mut i = customer("Ivan");
    ctx.repository::<Customer>().add(&mut i, true).await.unwrap();
    assert_eq!(publisher.count().await, 0);
    assert!(i.domain_events.is_empty());
    assert_eq!(ctx.store().fetch_all("customers").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unauthenticated_actor_is_recorded_as_zero() {
    let (ctx, _) = recording_context().await;
    ctx.set_actor(None).await;

    let mut j = customer("Judy");
    ctx.repository::<Customer>().add(&mut j, true).await.unwrap();
    assert_eq!(j.audit.created_by(), Some(0));
}

#[tokio::test]
async fn snapshot_changes_are_saved_without_explicit_update() {
    let (ctx, _) = recording_context().await;
    let repo = ctx.repository::<Customer>();

    let mut k = customer("Kim");
    repo.add(&mut k, true).await.unwrap();
    let tracked = repo
        .modify(k.id, |c| c.email = "kim@changed.example".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tracked.email, "kim@changed.example");

    assert_eq!(ctx.save_changes(true).await.unwrap(), 1);
    let stored = repo.get_no_tracking(k.id).await.unwrap().unwrap();
    assert_eq!(stored.email, "kim@changed.example");
    assert_eq!(stored.audit.last_modified_by(), Some(7));
}
