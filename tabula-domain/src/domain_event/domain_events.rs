use super::domain_event_trait::DomainEvent;
use std::fmt;
use std::slice::Iter;
use std::sync::Arc;

/// 实体持有的待派发事件缓冲区
///
/// 首次访问前为空（未初始化）；保存流程通过 `take` 取走全部事件，
/// 已派发的事件不会在下一次保存时再次派发。
/// 该字段不参与序列化，也不会写入存储。
#[derive(Clone, Default)]
pub struct DomainEvents {
    events: Option<Vec<Arc<dyn DomainEvent>>>,
}

impl DomainEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// 缓冲区是否已被初始化
    pub fn is_initialized(&self) -> bool {
        self.events.is_some()
    }

    /// 获取缓冲区，不存在时初始化
    pub fn get_or_init(&mut self) -> &mut Vec<Arc<dyn DomainEvent>> {
        self.events.get_or_insert_with(Vec::new)
    }

    /// 追加一个事件
    pub fn raise<T>(&mut self, event: T)
    where
        T: DomainEvent,
    {
        self.get_or_init().push(Arc::new(event));
    }

    /// 追加一个已共享的事件
    pub fn push(&mut self, event: Arc<dyn DomainEvent>) {
        self.get_or_init().push(event);
    }

    /// 取走全部事件并清空缓冲区（保持已初始化状态）
    pub fn take(&mut self) -> Vec<Arc<dyn DomainEvent>> {
        match self.events.as_mut() {
            Some(events) => std::mem::take(events),
            None => Vec::new(),
        }
    }

    /// 获取事件数量
    pub fn len(&self) -> usize {
        self.events.as_ref().map_or(0, Vec::len)
    }

    /// 判断是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 迭代事件引用（不消费缓冲区）
    pub fn iter(&self) -> Iter<'_, Arc<dyn DomainEvent>> {
        self.events.as_deref().unwrap_or(&[]).iter()
    }
}

impl fmt::Debug for DomainEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.events {
            None => f.write_str("DomainEvents(uninitialized)"),
            Some(events) => f
                .debug_list()
                .entries(events.iter().map(|e| e.event_type()))
                .finish(),
        }
    }
}

impl<'a> IntoIterator for &'a DomainEvents {
    type Item = &'a Arc<dyn DomainEvent>;
    type IntoIter = Iter<'a, Arc<dyn DomainEvent>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::EventMeta;
    use chrono::{DateTime, Utc};
    use std::any::Any;

    #[derive(Debug)]
    struct Pinged {
        meta: EventMeta,
        n: u32,
    }

    impl DomainEvent for Pinged {
        fn event_id(&self) -> i64 {
            self.meta.event_id()
        }
        fn event_type(&self) -> &str {
            "Pinged"
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.meta.occurred_at()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn buffer_is_lazy_until_first_access() {
        let mut buf = DomainEvents::new();
        assert!(!buf.is_initialized());
        assert!(buf.is_empty());
        assert!(buf.take().is_empty());
        assert!(!buf.is_initialized());

        buf.get_or_init();
        assert!(buf.is_initialized());
        assert!(buf.is_empty());
    }

    #[test]
    fn take_drains_in_insertion_order() {
        let mut buf = DomainEvents::new();
        for n in 0..3 {
            buf.raise(Pinged {
                meta: EventMeta::new(),
                n,
            });
        }
        assert_eq!(buf.len(), 3);

        let drained = buf.take();
        let ns: Vec<u32> = drained
            .iter()
            .map(|e| e.downcast_ref::<Pinged>().unwrap().n)
            .collect();
        assert_eq!(ns, vec![0, 1, 2]);

        assert!(buf.is_initialized());
        assert!(buf.is_empty());
        assert!(buf.take().is_empty());
    }

    #[test]
    fn debug_lists_event_types() {
        let mut buf = DomainEvents::new();
        assert_eq!(format!("{buf:?}"), "DomainEvents(uninitialized)");
        buf.raise(Pinged {
            meta: EventMeta::new(),
            n: 1,
        });
        assert_eq!(format!("{buf:?}"), "[\"Pinged\"]");
        assert_eq!(buf.iter().count(), 1);
    }
}
