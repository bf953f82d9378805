use futures_util::{FutureExt, StreamExt};
use std::sync::Arc;
use tabula_domain::domain_event::{DomainEvent, EntityChangedEvent, EventMeta};
use tabula_domain::error::DomainResult;
use tabula_domain::eventing::InMemoryEventBus;
use tabula_macros::{domain_event, entity};
use tabula_persistence::{
    Actor, DbContext, HasMany, Model, SqliteStore, SqliteStoreConfig, UnitOfWork,
    sql_interpolated,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[entity(table = "accounts", audit, soft_delete, version_tracking)]
struct Account {
    owner: String,
    balance: i64,
    #[serde(skip)]
    entries: Vec<LedgerEntry>,
}

#[entity(table = "ledger_entries", audit)]
struct LedgerEntry {
    account_id: i64,
    amount: i64,
}

#[domain_event(name = "account.overdrawn")]
struct AccountOverdrawn {
    account_id: i64,
    balance: i64,
}

impl Account {
    fn post(&mut self, amount: i64) {
        self.balance += amount;
        if self.balance < 0 {
            self.domain_events.raise(AccountOverdrawn {
                meta: EventMeta::new(),
                account_id: self.id,
                balance: self.balance,
            });
        }
    }
}

fn describe(event: &Arc<dyn DomainEvent>) -> String {
    if let Some(changed) = event.downcast_ref::<EntityChangedEvent<Account>>() {
        let account = changed.data();
        format!(
            "{} #{} {} balance={}",
            event.event_type(),
            account.id,
            account.owner,
            account.balance
        )
    } else if let Some(overdrawn) = event.downcast_ref::<AccountOverdrawn>() {
        format!(
            "{} #{} balance={}",
            event.event_type(),
            overdrawn.account_id,
            overdrawn.balance
        )
    } else {
        event.event_type().to_string()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug 可查看保存流程的每个阶段
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus = InMemoryEventBus::default();
    let mut events = bus.subscribe();

    let store = SqliteStore::connect(&SqliteStoreConfig::in_memory()).await?;
    let model = Model::builder()
        .entity::<Account>()
        .entity::<LedgerEntry>()
        .build()?;
    let ctx = DbContext::builder()
        .store(Arc::new(store))
        .model(model)
        .publisher(Arc::new(bus.clone()))
        .actor(Actor::with_user_id(42))
        .build();
    ctx.ensure_created().await?;

    let uow = UnitOfWork::new(ctx.clone());
    let accounts = uow.repository::<Account>();
    let ledger = uow.repository::<LedgerEntry>();

    let mut opened = [
        Account {
            owner: "alice".into(),
            balance: 100,
            ..Default::default()
        },
        Account {
            owner: "bob".into(),
            ..Default::default()
        },
    ];
    let saved = accounts.add_range(&mut opened, true).await?;
    info!(saved, "accounts opened");
    let [mut alice, mut bob] = opened;

    let mut entries = [
        LedgerEntry {
            account_id: alice.id,
            amount: -30,
            ..Default::default()
        },
        LedgerEntry {
            account_id: bob.id,
            amount: -10,
            ..Default::default()
        },
    ];
    ledger.add_range(&mut entries, false).await?;
    alice.post(-30);
    bob.post(-10);
    accounts.update(&mut alice, false).await?;
    accounts.update(&mut bob, false).await?;
    info!(affected = uow.commit().await?, "ledger posted");

    // 不保存的修改可以回滚
    accounts.modify(alice.id, |a| a.balance = 1_000_000).await?;
    uow.rollback().await?;

    let affected = uow
        .execute_sql_interpolated(sql_interpolated!(
            "UPDATE \"accounts\" SET body = json_set(body, '$.owner', {}) WHERE id = {}",
            "Alice",
            alice.id
        )?)
        .await?;
    info!(affected, "owner renamed with raw sql");

    accounts.delete(&bob, true).await?;

    let with_entries = accounts
        .query_no_tracking()
        .include(HasMany::new(
            "entries",
            |e: &LedgerEntry| e.account_id,
            |a: &mut Account, entries| a.entries = entries,
        ))
        .order_by(|a: &Account| a.id)
        .to_list()
        .await?;
    for account in &with_entries {
        info!(
            id = account.id,
            owner = %account.owner,
            balance = account.balance,
            entries = account.entries.len(),
            created_by = ?account.audit.created_by(),
            last_modified_at = ?account.audit.last_modified_at(),
            "visible account"
        );
    }

    let received: Vec<DomainResult<Arc<dyn DomainEvent>>> =
        std::iter::from_fn(|| events.next().now_or_never().flatten()).collect();
    for event in received {
        let event = event?;
        info!(id = event.event_id(), "{}", describe(&event));
    }

    Ok(())
}
