//! 配置项
//!
//! - `DbContextOptions`：保存流程的行为开关，可由宿主从配置文件反序列化；
//! - `SqliteStoreConfig`：SQLite 连接池参数。
//!
use crate::identity::SYSTEM_USER_ID;
use bon::Builder;
use serde::{Deserialize, Serialize};

#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbContextOptions {
    /// 是否从调用者身份解析审计用户；关闭时使用 `fallback_user_id`
    #[builder(default = true)]
    pub authentication_enabled: bool,
    #[builder(default = SYSTEM_USER_ID)]
    pub fallback_user_id: i64,
    /// 关闭后收集到的事件直接丢弃，不交给发布者
    #[builder(default = true)]
    pub publish_events: bool,
}

impl Default for DbContextOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    #[builder(into)]
    url: String,
    #[builder(default = 1)]
    #[serde(default = "default_max_connections")]
    max_connections: u32,
    #[builder(default = true)]
    #[serde(default = "default_create_if_missing")]
    create_if_missing: bool,
}

fn default_max_connections() -> u32 {
    1
}

fn default_create_if_missing() -> bool {
    true
}

impl SqliteStoreConfig {
    /// 单连接的内存数据库
    pub fn in_memory() -> Self {
        Self::builder().url("sqlite::memory:").build()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn create_if_missing(&self) -> bool {
        self.create_if_missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_options_defaults() {
        let opts = DbContextOptions::default();
        assert!(opts.authentication_enabled);
        assert_eq!(opts.fallback_user_id, SYSTEM_USER_ID);
        assert!(opts.publish_events);
    }

    #[test]
    fn context_options_fill_missing_keys_from_defaults() {
        let opts: DbContextOptions =
            serde_json::from_str(r#"{"authentication_enabled": false}"#).unwrap();
        assert!(!opts.authentication_enabled);
        assert_eq!(opts.fallback_user_id, 1);
        assert!(opts.publish_events);
    }

    #[test]
    fn sqlite_config_defaults() {
        let cfg = SqliteStoreConfig::in_memory();
        assert_eq!(cfg.url(), "sqlite::memory:");
        assert_eq!(cfg.max_connections(), 1);
        assert!(cfg.create_if_missing());

        let cfg: SqliteStoreConfig =
            serde_json::from_str(r#"{"url": "sqlite://app.db", "max_connections": 4}"#).unwrap();
        assert_eq!(cfg.max_connections(), 4);
        assert!(cfg.create_if_missing());
    }
}
