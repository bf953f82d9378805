//! 查询构建（Query）
//!
//! 对单个实体类型的可组合查询：条件、排序、分页与导航加载。
//! 全局过滤器与派生类型的鉴别总是先于用户条件生效，且不能被跳过。
//!
//! 跟踪查询在得到结果后做身份解析：已被跟踪的实体返回跟踪中的当前值，
//! 其余实体以未修改状态开始跟踪。条件与排序作用于存储中的值。
//! 非跟踪查询直接读取存储，不触碰跟踪器。
//!
use crate::context::DbContext;
use crate::error::DbResult;
use crate::include::Include;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tabula_domain::entity::Entity;
use tabula_domain::specification::Specification;
use tracing::debug;

type Comparator<E> = Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

pub struct Query<E: Entity> {
    ctx: DbContext,
    tracking: bool,
    predicates: Vec<Arc<dyn Specification<E>>>,
    order: Option<Comparator<E>>,
    skip: usize,
    take: Option<usize>,
    includes: Vec<Arc<dyn Include<E>>>,
}

impl<E: Entity> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            tracking: self.tracking,
            predicates: self.predicates.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
            includes: self.includes.clone(),
        }
    }
}

impl<E: Entity> Query<E> {
    pub(crate) fn new(ctx: DbContext, tracking: bool) -> Self {
        Self {
            ctx,
            tracking,
            predicates: Vec::new(),
            order: None,
            skip: 0,
            take: None,
            includes: Vec::new(),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// 追加条件（多个条件之间为 AND）
    pub fn filter<S>(mut self, spec: S) -> Self
    where
        S: Specification<E> + 'static,
    {
        self.predicates.push(Arc::new(spec));
        self
    }

    /// 按键升序排序
    pub fn order_by<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(move |a: &E, b: &E| key(a).cmp(&key(b))));
        self
    }

    /// 按键降序排序
    pub fn order_by_desc<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(move |a: &E, b: &E| key(b).cmp(&key(a))));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// 追加一个导航加载
    pub fn include<I>(mut self, include: I) -> Self
    where
        I: Include<E> + 'static,
    {
        self.includes.push(Arc::new(include));
        self
    }

    pub(crate) fn with_includes(mut self, includes: Vec<Arc<dyn Include<E>>>) -> Self {
        self.includes.extend(includes);
        self
    }

    // 读取存储并应用过滤、条件、排序与分页
    async fn load(&self) -> DbResult<Vec<E>> {
        let model = self.ctx.model();
        let mapping = model.mapping::<E>()?;
        let rows = self.ctx.store().fetch_all(mapping.table()).await?;
        let fetched = rows.len();

        let mut items = Vec::new();
        for row in rows {
            if !model.is_visible(&mapping, &row) {
                continue;
            }
            let entity: E = serde_json::from_value(Value::Object(row))?;
            if self.predicates.iter().all(|p| p.is_satisfied_by(&entity)) {
                items.push(entity);
            }
        }
        if let Some(order) = &self.order {
            items.sort_by(|a, b| order(a, b));
        }
        let items: Vec<E> = items
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect();

        debug!(
            entity = E::TYPE,
            table = mapping.table(),
            fetched,
            matched = items.len(),
            tracking = self.tracking,
            "query executed"
        );
        Ok(items)
    }

    pub async fn to_list(self) -> DbResult<Vec<E>> {
        let mut items = self.load().await?;

        if self.tracking {
            let mapping = self.ctx.model().mapping::<E>()?;
            let mut state = self.ctx.lock().await;
            items = items
                .into_iter()
                .map(|e| state.tracker.track_loaded(e, mapping))
                .collect::<DbResult<Vec<E>>>()?;
        }

        // 导航加载在释放跟踪器锁之后进行
        for include in &self.includes {
            debug!(path = include.path(), "loading navigation");
            include.load(&self.ctx, self.tracking, &mut items).await?;
        }
        Ok(items)
    }

    /// 第一条结果，没有时为 `None`
    pub async fn first(self) -> DbResult<Option<E>> {
        Ok(self.take(1).to_list().await?.into_iter().next())
    }

    /// 满足条件的数量（不跟踪、不加载导航）
    pub async fn count(&self) -> DbResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn any(&self) -> DbResult<bool> {
        Ok(self.count().await? > 0)
    }
}
