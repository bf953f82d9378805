use serde::{Deserialize, Serialize};
use tabula_domain::entity::Entity;
use tabula_macros::entity;

// 用户自行声明的 id 与 derive 会被保留并去重
#[entity(soft_delete)]
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Product {
    title: String,
    id: i64,
    is_deleted: bool,
}

fn main() {
    let p = Product {
        id: 3,
        title: "lamp".into(),
        is_deleted: false,
    };
    assert_eq!(p.id(), 3);
    assert_eq!(p.clone(), p);
    assert_eq!(Product::TYPE, "product");
}
