//! 导航加载（Include）
//!
//! 查询完成后按导航关系批量加载关联实体并回填到结果上：
//! - `HasMany`：一对多，按子实体上的外键分组；
//! - `BelongsTo`：多对一，按外键逐个读取主实体（同一外键只读取一次）。
//!
//! 关联实体同样受全局过滤器约束。导航字段本身不应参与序列化（`#[serde(skip)]`），
//! 否则会被当作普通列写入存储。
//!
use crate::context::DbContext;
use crate::error::DbResult;
use crate::query::Query;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tabula_domain::entity::Entity;

#[async_trait]
pub trait Include<E: Entity>: Send + Sync {
    /// 导航路径名，用于日志
    fn path(&self) -> &str;

    /// 为 `parents` 加载并回填关联实体
    async fn load(&self, ctx: &DbContext, tracking: bool, parents: &mut [E]) -> DbResult<()>;
}

/// 一对多导航
pub struct HasMany<P, C> {
    path: &'static str,
    foreign_key: fn(&C) -> i64,
    assign: fn(&mut P, Vec<C>),
}

impl<P, C> HasMany<P, C> {
    pub fn new(path: &'static str, foreign_key: fn(&C) -> i64, assign: fn(&mut P, Vec<C>)) -> Self {
        Self {
            path,
            foreign_key,
            assign,
        }
    }
}

#[async_trait]
impl<P, C> Include<P> for HasMany<P, C>
where
    P: Entity,
    C: Entity,
{
    fn path(&self) -> &str {
        self.path
    }

    async fn load(&self, ctx: &DbContext, tracking: bool, parents: &mut [P]) -> DbResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        // 只读取（并跟踪）属于这些父实体的子实体
        let parent_ids: HashSet<i64> = parents.iter().map(|p| p.id()).collect();
        let foreign_key = self.foreign_key;
        let children = Query::<C>::new(ctx.clone(), tracking)
            .filter(move |c: &C| parent_ids.contains(&foreign_key(c)))
            .to_list()
            .await?;
        let mut grouped: HashMap<i64, Vec<C>> = HashMap::new();
        for child in children {
            grouped
                .entry((self.foreign_key)(&child))
                .or_default()
                .push(child);
        }
        for parent in parents.iter_mut() {
            let related = grouped.remove(&parent.id()).unwrap_or_default();
            (self.assign)(parent, related);
        }
        Ok(())
    }
}

/// 多对一导航
pub struct BelongsTo<C, P> {
    path: &'static str,
    foreign_key: fn(&C) -> i64,
    assign: fn(&mut C, Option<P>),
}

impl<C, P> BelongsTo<C, P> {
    pub fn new(path: &'static str, foreign_key: fn(&C) -> i64, assign: fn(&mut C, Option<P>)) -> Self {
        Self {
            path,
            foreign_key,
            assign,
        }
    }
}

#[async_trait]
impl<C, P> Include<C> for BelongsTo<C, P>
where
    C: Entity,
    P: Entity,
{
    fn path(&self) -> &str {
        self.path
    }

    async fn load(&self, ctx: &DbContext, tracking: bool, parents: &mut [C]) -> DbResult<()> {
        let repo = ctx.repository::<P>();
        let mut cache: HashMap<i64, Option<P>> = HashMap::new();
        for child in parents.iter_mut() {
            let key = (self.foreign_key)(child);
            if !cache.contains_key(&key) {
                let principal = if tracking {
                    repo.get(key).await?
                } else {
                    repo.get_no_tracking(key).await?
                };
                cache.insert(key, principal);
            }
            (self.assign)(child, cache.get(&key).cloned().flatten());
        }
        Ok(())
    }
}
