use tabula_domain::entity::{Capabilities, Entity};
use tabula_macros::entity;

#[entity]
struct OrderLine {
    sku: String,
    quantity: u32,
}

fn main() {
    assert_eq!(OrderLine::TYPE, "order_line");
    assert_eq!(OrderLine::CAPABILITIES, Capabilities::NONE);

    let mut line = OrderLine {
        sku: "A-1".into(),
        quantity: 2,
        ..Default::default()
    };
    assert_eq!(line.id(), 0);
    line.set_id(7);
    assert_eq!(line.id, 7);
    assert_eq!(line.quantity, 2);
    assert!(!line.sku.is_empty());
}
