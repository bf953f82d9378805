mod domain_event;
mod entity;
mod utils;

use proc_macro::TokenStream;

/// 实体宏
/// - 追加 `id: i64` 字段并置于最前
/// - 按声明的能力追加字段：`audit`（审计块，序列化时展开）、`is_deleted`、`domain_events`
/// - 派生 Debug（可用 `debug = false` 关闭）、Clone、Default、Serialize、Deserialize
/// - 实现 `::tabula_domain::entity::Entity` 及对应的能力 trait
///
/// 示例：`#[entity(table = "customers", audit, soft_delete, version_tracking)]`
#[proc_macro_attribute]
pub fn entity(attr: TokenStream, item: TokenStream) -> TokenStream {
    entity::expand(attr, item)
}

/// 领域事件宏
/// - 追加 `meta: EventMeta` 字段（若缺失）
/// - 生成 `EVENT_TYPE` 常量与 `::tabula_domain::domain_event::DomainEvent` 实现
///
/// 示例：`#[domain_event(name = "order.placed")]`
#[proc_macro_attribute]
pub fn domain_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    domain_event::expand(attr, item)
}
