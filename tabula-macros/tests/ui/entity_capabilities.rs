use tabula_domain::entity::{Auditable, Entity, HasDomainEvents, SoftDelete};
use tabula_macros::entity;

#[entity(table = "customers", audit, soft_delete, version_tracking, debug = false)]
struct Customer {
    name: String,
}

impl std::fmt::Debug for Customer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Customer({})", self.name)
    }
}

#[entity(events)]
struct Invoice {
    total: i64,
}

fn main() {
    assert_eq!(Customer::TYPE, "customers");
    assert!(Customer::CAPABILITIES.version_tracking());

    let mut c = Customer {
        name: "ada".into(),
        ..Default::default()
    };
    c.set_deleted(true);
    assert!(c.is_deleted());
    assert!(c.audit_info().created_at().is_none());
    assert!(c.domain_events().is_empty());
    assert_eq!(format!("{c:?}"), "Customer(ada)");

    let invoice = Invoice::default();
    assert!(Invoice::CAPABILITIES.domain_events());
    assert!(!Invoice::CAPABILITIES.version_tracking());
    assert!(invoice.as_event_source().is_some());
    assert_eq!(invoice.total, 0);
}
