//! 模型配置（Model）
//!
//! 登记参与持久化的实体类型及其映射：
//! - 根实体独占一张表（表名为 `Entity::TYPE`）；
//! - 派生实体共用基类型的表，行内写入鉴别列区分具体类型；
//! - 声明了软删除能力的根实体，其表上注册“未被标记删除”的全局过滤器。
//!
//! 过滤器按表生效，派生实体不单独注册，而是继承根实体所在表的过滤器。
//!
use crate::error::{DbError, DbResult};
use crate::store::Row;
use serde_json::Value;
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use tabula_domain::entity::{Capabilities, Entity, SOFT_DELETE_COLUMN};
use tracing::debug;

/// 派生实体在存储行中的鉴别列
pub const DISCRIMINATOR_COLUMN: &str = "__discriminator";

/// 单个实体类型的映射
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMapping {
    type_id: TypeId,
    name: &'static str,
    table: &'static str,
    discriminator: Option<&'static str>,
    capabilities: Capabilities,
}

impl EntityMapping {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// 派生实体的鉴别值；根实体为 `None`
    pub fn discriminator(&self) -> Option<&'static str> {
        self.discriminator
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn is_root(&self) -> bool {
        self.discriminator.is_none()
    }

    /// 行是否属于该类型（根实体接受整表，派生实体只接受自己的鉴别值）
    pub fn owns_row(&self, row: &Row) -> bool {
        match self.discriminator {
            None => true,
            Some(d) => row.get(DISCRIMINATOR_COLUMN).and_then(Value::as_str) == Some(d),
        }
    }
}

/// 表级查询过滤器
#[derive(Clone, Copy)]
pub struct QueryFilter {
    name: &'static str,
    predicate: fn(&Row) -> bool,
}

impl QueryFilter {
    /// 排除已被软删除的行
    pub const NOT_DELETED: QueryFilter = QueryFilter {
        name: "not_deleted",
        predicate: not_deleted,
    };

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, row: &Row) -> bool {
        (self.predicate)(row)
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryFilter").field(&self.name).finish()
    }
}

fn not_deleted(row: &Row) -> bool {
    !row.get(SOFT_DELETE_COLUMN)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// 构建完成的模型
#[derive(Debug, Clone, Default)]
pub struct Model {
    mappings: HashMap<TypeId, EntityMapping>,
    filters: HashMap<&'static str, Vec<QueryFilter>>,
    tables: Vec<&'static str>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    /// 查找实体映射，未登记的类型返回 `InvalidState`
    pub fn mapping<E: Entity>(&self) -> DbResult<EntityMapping> {
        self.mappings
            .get(&TypeId::of::<E>())
            .copied()
            .ok_or_else(|| {
                DbError::invalid_state(format!(
                    "entity type {} is not registered in the model",
                    type_name::<E>()
                ))
            })
    }

    pub fn is_registered<E: Entity>(&self) -> bool {
        self.mappings.contains_key(&TypeId::of::<E>())
    }

    /// 所有需要建表的表名（按登记顺序）
    pub fn tables(&self) -> &[&'static str] {
        &self.tables
    }

    pub fn filters(&self, table: &str) -> &[QueryFilter] {
        self.filters.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 行是否通过表上的全部过滤器
    pub fn passes_filters(&self, table: &str, row: &Row) -> bool {
        self.filters(table).iter().all(|f| f.matches(row))
    }

    /// 行对给定映射是否可见：类型匹配且通过过滤器
    pub fn is_visible(&self, mapping: &EntityMapping, row: &Row) -> bool {
        mapping.owns_row(row) && self.passes_filters(mapping.table(), row)
    }
}

struct PendingDerived {
    mapping: EntityMapping,
    base: TypeId,
    base_name: &'static str,
}

/// 模型构建器
#[derive(Default)]
pub struct ModelBuilder {
    roots: Vec<EntityMapping>,
    derived: Vec<PendingDerived>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记根实体
    pub fn entity<E: Entity>(mut self) -> Self {
        self.roots.push(EntityMapping {
            type_id: TypeId::of::<E>(),
            name: type_name::<E>(),
            table: E::TYPE,
            discriminator: None,
            capabilities: E::CAPABILITIES,
        });
        self
    }

    /// 登记派生实体：映射到 `B` 的表，以 `E::TYPE` 作为鉴别值
    pub fn derived_entity<E: Entity, B: Entity>(mut self) -> Self {
        self.derived.push(PendingDerived {
            mapping: EntityMapping {
                type_id: TypeId::of::<E>(),
                name: type_name::<E>(),
                table: B::TYPE,
                discriminator: Some(E::TYPE),
                capabilities: E::CAPABILITIES,
            },
            base: TypeId::of::<B>(),
            base_name: type_name::<B>(),
        });
        self
    }

    pub fn build(self) -> DbResult<Model> {
        let mut model = Model::default();

        for root in self.roots {
            if model.mappings.contains_key(&root.type_id) {
                return Err(DbError::invalid_state(format!(
                    "entity type {} registered twice",
                    root.name
                )));
            }
            if model.tables.contains(&root.table) {
                return Err(DbError::invalid_state(format!(
                    "table {} is already mapped by another root entity",
                    root.table
                )));
            }
            if root.capabilities.soft_delete() {
                model
                    .filters
                    .entry(root.table)
                    .or_default()
                    .push(QueryFilter::NOT_DELETED);
            }
            debug!(entity = root.name, table = root.table, capabilities = %root.capabilities, "entity registered");
            model.tables.push(root.table);
            model.mappings.insert(root.type_id, root);
        }

        for pending in self.derived {
            let base = model.mappings.get(&pending.base).ok_or_else(|| {
                DbError::invalid_state(format!(
                    "base entity {} of {} must be registered as a root",
                    pending.base_name, pending.mapping.name
                ))
            })?;
            if !base.is_root() {
                return Err(DbError::invalid_state(format!(
                    "base entity {} of {} is itself derived",
                    pending.base_name, pending.mapping.name
                )));
            }
            if model.mappings.contains_key(&pending.mapping.type_id) {
                return Err(DbError::invalid_state(format!(
                    "entity type {} registered twice",
                    pending.mapping.name
                )));
            }
            debug!(
                entity = pending.mapping.name,
                table = pending.mapping.table,
                "derived entity registered"
            );
            model
                .mappings
                .insert(pending.mapping.type_id, pending.mapping);
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_macros::entity;

    #[entity(table = "documents", soft_delete)]
    struct Document {
        title: String,
    }

    // 派生类型自身也声明软删除，但不单独注册过滤器
    #[entity(table = "invoice", soft_delete)]
    struct Invoice {
        title: String,
        total: i64,
    }

    #[entity(table = "tags")]
    struct Tag {
        label: String,
    }

    #[entity(table = "labels", soft_delete)]
    struct Label {
        text: String,
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn soft_delete_roots_get_a_table_filter() {
        let model = Model::builder()
            .entity::<Document>()
            .entity::<Tag>()
            .build()
            .unwrap();

        assert_eq!(model.tables(), &["documents", "tags"]);
        assert_eq!(model.filters("documents").len(), 1);
        assert_eq!(model.filters("documents")[0].name(), "not_deleted");
        assert!(model.filters("tags").is_empty());

        assert!(model.passes_filters("documents", &row(json!({"is_deleted": false}))));
        assert!(!model.passes_filters("documents", &row(json!({"is_deleted": true}))));
        assert!(model.passes_filters("tags", &row(json!({"is_deleted": true}))));
    }

    #[test]
    fn derived_entities_share_the_base_table_and_filter() {
        let model = Model::builder()
            .entity::<Document>()
            .derived_entity::<Invoice, Document>()
            .build()
            .unwrap();

        let invoice = model.mapping::<Invoice>().unwrap();
        assert_eq!(invoice.table(), "documents");
        assert_eq!(invoice.discriminator(), Some("invoice"));
        assert!(!invoice.is_root());
        assert_eq!(model.tables(), &["documents"]);
        assert_eq!(model.filters("documents").len(), 1);

        let stored = row(json!({"title": "x", "__discriminator": "invoice", "is_deleted": false}));
        assert!(model.is_visible(&invoice, &stored));
        let plain = row(json!({"title": "x"}));
        assert!(!model.is_visible(&invoice, &plain));
        assert!(model.is_visible(&model.mapping::<Document>().unwrap(), &stored));
    }

    #[test]
    fn derived_entity_on_unfiltered_root_inherits_no_filter() {
        let model = Model::builder()
            .entity::<Tag>()
            .derived_entity::<Label, Tag>()
            .build()
            .unwrap();
        let label = model.mapping::<Label>().unwrap();
        assert!(label.capabilities().soft_delete());
        assert!(model.filters("tags").is_empty());
    }

    #[test]
    fn unregistered_and_invalid_registrations_fail() {
        let model = Model::builder().entity::<Tag>().build().unwrap();
        assert!(matches!(
            model.mapping::<Document>(),
            Err(DbError::InvalidState { .. })
        ));

        let err = Model::builder()
            .derived_entity::<Invoice, Document>()
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));

        let err = Model::builder()
            .entity::<Tag>()
            .entity::<Tag>()
            .build()
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
    }
}
