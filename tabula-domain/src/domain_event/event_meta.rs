use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_EVENT_ID: AtomicI64 = AtomicI64::new(1);

/// 事件元数据：数值标识与发生时间，创建后不可变
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    #[builder(default = next_event_id())]
    event_id: i64,
    #[builder(default = Utc::now())]
    occurred_at: DateTime<Utc>,
}

impl EventMeta {
    /// 以进程内递增序号与当前 UTC 时间创建
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

fn next_event_id() -> i64 {
    NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
}
