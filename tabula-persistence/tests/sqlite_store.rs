#![cfg(feature = "sqlite")]

mod common;

use common::*;
use std::sync::Arc;
use tabula_persistence::{
    DbContext, DbContextOptions, DbError, RawSql, SqliteStore, SqliteStoreConfig, Store,
    UnitOfWork, sql_interpolated,
};

async fn sqlite_context() -> (DbContext, Arc<RecordingPublisher>) {
    let store = SqliteStore::connect(&SqliteStoreConfig::in_memory())
        .await
        .unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = context_with(
        Arc::new(store),
        Some(publisher.clone() as Arc<dyn tabula_domain::eventing::EventPublisher>),
        DbContextOptions::default(),
    )
    .await;
    (ctx, publisher)
}

#[tokio::test]
async fn full_lifecycle_on_sqlite() {
    let (ctx, publisher) = sqlite_context().await;
    let repo = ctx.repository::<Customer>();

    let mut a = customer("Ada");
    let mut b = customer("Bea");
    repo.add(&mut a, true).await.unwrap();
    repo.add(&mut b, true).await.unwrap();
    assert_eq!((a.id, b.id), (1, 2));
    assert_eq!(a.audit.created_by(), Some(7));

    a.email = "ada@new.example".into();
    repo.update(&mut a, true).await.unwrap();
    let stored = repo.get_no_tracking(a.id).await.unwrap().unwrap();
    assert_eq!(stored.email, "ada@new.example");
    assert_eq!(stored.audit.created_at(), a.audit.created_at());
    assert!(stored.audit.last_modified_at().is_some());

    repo.delete(&b, true).await.unwrap();
    assert_eq!(repo.get_all_no_tracking().await.unwrap().len(), 1);
    let rows = ctx.store().fetch_all("customers").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("is_deleted"), Some(&serde_json::Value::Bool(true)));

    // 新增两次、更新一次；软删除不产生变更事件
    assert_eq!(publisher.count().await, 3);
}

#[tokio::test]
async fn raw_sql_bypasses_tracking() {
    let (ctx, publisher) = sqlite_context().await;
    let uow = UnitOfWork::new(ctx.clone());
    let repo = uow.repository::<Customer>();

    let mut c = customer("Cy");
    repo.add(&mut c, true).await.unwrap();
    let before = publisher.count().await;

    let affected = uow
        .execute_sql_interpolated(
            sql_interpolated!(
                "UPDATE \"customers\" SET body = json_set(body, '$.name', {}) WHERE id = {}",
                "Cyrus",
                c.id
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(publisher.count().await, before);

    let stored = repo.get_no_tracking(c.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Cyrus");
    assert_eq!(stored.audit.last_modified_at(), None);

    let affected = uow
        .execute_sql_raw("UPDATE \"customers\" SET body = json_set(body, '$.email', 'x@y')")
        .await
        .unwrap();
    assert_eq!(affected, 1);
}

#[tokio::test]
async fn invalid_raw_sql_is_a_persistence_error() {
    let (ctx, _) = sqlite_context().await;
    let err = UnitOfWork::new(ctx)
        .execute_sql_interpolated(RawSql::new("UPDATE nowhere SET x = ?").bind(1))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Persistence { .. }));
}

#[tokio::test]
async fn failed_commits_roll_back_the_transaction() {
    let (ctx, _) = sqlite_context().await;
    let repo = ctx.repository::<OrderLine>();

    let mut ghost = line(1, "GHOST", 1);
    ghost.id = 77;
    repo.attach(&mut ghost).await.unwrap();
    repo.delete(&ghost, false).await.unwrap();
    let mut fresh = line(1, "A", 1);
    repo.add(&mut fresh, false).await.unwrap();

    let err = ctx.save_changes(true).await.unwrap_err();
    assert!(matches!(err, DbError::Persistence { .. }));
    assert!(ctx.store().fetch_all("order_lines").await.unwrap().is_empty());
}

#[tokio::test]
async fn derived_rows_keep_their_discriminator() {
    let (ctx, _) = sqlite_context().await;
    let mut vip = VipCustomer {
        name: "Vi".into(),
        tier: 2,
        ..Default::default()
    };
    ctx.repository::<VipCustomer>()
        .add(&mut vip, true)
        .await
        .unwrap();

    let raw = ctx.store().fetch("customers", vip.id).await.unwrap().unwrap();
    assert_eq!(
        raw.get(tabula_persistence::DISCRIMINATOR_COLUMN),
        Some(&serde_json::Value::from("vip_customer"))
    );
    let loaded = ctx
        .repository::<VipCustomer>()
        .get_no_tracking(vip.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.tier, 2);
}
