//! 规约（Specification）
//!
//! 查询条件以值的形式传给仓储：`find`、`find_all`、`find_by` 以及查询构建器的 `filter`。
//! 任何 `Fn(&T) -> bool` 闭包都是规约；组合结果保持具体类型，不做装箱。
//!
//! ```ignore
//! let active = |c: &Customer| !c.is_deleted;
//! let named = |c: &Customer| c.name.starts_with('A');
//! repo.find_all(active.and(named.not())).await?;
//! ```

pub trait Specification<T>: Send + Sync {
    fn is_satisfied_by(&self, candidate: &T) -> bool;

    /// 两者都满足
    fn and<S>(self, other: S) -> And<Self, S>
    where
        Self: Sized,
        S: Specification<T>,
    {
        And(self, other)
    }

    /// 任一满足
    fn or<S>(self, other: S) -> Or<Self, S>
    where
        Self: Sized,
        S: Specification<T>,
    {
        Or(self, other)
    }

    fn not(self) -> Not<Self>
    where
        Self: Sized,
    {
        Not(self)
    }
}

impl<T, F> Specification<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self(candidate)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct And<A, B>(A, B);

impl<T, A, B> Specification<T> for And<A, B>
where
    A: Specification<T>,
    B: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.0.is_satisfied_by(candidate) && self.1.is_satisfied_by(candidate)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Or<A, B>(A, B);

impl<T, A, B> Specification<T> for Or<A, B>
where
    A: Specification<T>,
    B: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.0.is_satisfied_by(candidate) || self.1.is_satisfied_by(candidate)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Not<A>(A);

impl<T, A> Specification<T> for Not<A>
where
    A: Specification<T>,
{
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        !self.0.is_satisfied_by(candidate)
    }
}

/// 满足全部给定规约；列表为空时总是满足
pub struct AllOf<T> {
    specs: Vec<Box<dyn Specification<T>>>,
}

impl<T> AllOf<T> {
    pub fn new(specs: Vec<Box<dyn Specification<T>>>) -> Self {
        Self { specs }
    }
}

impl<T> Specification<T> for AllOf<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.specs.iter().all(|s| s.is_satisfied_by(candidate))
    }
}

/// 满足任一给定规约；列表为空时总是不满足
pub struct AnyOf<T> {
    specs: Vec<Box<dyn Specification<T>>>,
}

impl<T> AnyOf<T> {
    pub fn new(specs: Vec<Box<dyn Specification<T>>>) -> Self {
        Self { specs }
    }
}

impl<T> Specification<T> for AnyOf<T> {
    fn is_satisfied_by(&self, candidate: &T) -> bool {
        self.specs.iter().any(|s| s.is_satisfied_by(candidate))
    }
}
