use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;

/// 领域事件需要满足的通用能力边界
///
/// 事件以 `Arc<dyn DomainEvent>` 的形式在实体缓冲区与发布者之间传递，
/// 订阅方可通过 `downcast_ref` 还原具体类型。
pub trait DomainEvent: Any + fmt::Debug + Send + Sync {
    /// 事件数值标识
    fn event_id(&self) -> i64;

    /// 事件类型（形如 `EntityChanged` 或自定义类型名）
    fn event_type(&self) -> &str;

    /// 事件发生时间
    fn occurred_at(&self) -> DateTime<Utc>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn DomainEvent {
    /// 还原为具体事件类型
    pub fn downcast_ref<T: DomainEvent>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: DomainEvent>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
