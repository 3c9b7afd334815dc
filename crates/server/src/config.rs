//! Database configuration and the provider seam the server reads it through.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Backend kind for the event database.
///
/// Only [`StoreType::Sqlite`] has a backend. Any other value leaves the
/// persistence worker idle until the configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Sqlite,
    Firebird,
    Postgres,
    /// Any value this build does not recognize.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::Firebird => "firebird",
            Self::Postgres => "postgres",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Where and how events are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDbConfig {
    /// Backend kind.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,

    /// Directory holding one database file per month.
    #[serde(rename = "path", default = "default_store_path")]
    pub store_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for EventDbConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            store_path: default_store_path(),
        }
    }
}

impl EventDbConfig {
    pub fn new(store_type: StoreType, store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_type,
            store_path: store_path.into(),
        }
    }
}

/// Source of the database configuration.
///
/// The persistence worker asks again every time it opens a session, so a
/// provider may hand out different values over time.
pub trait ConfigProvider: Send + Sync {
    fn event_db_config(&self) -> EventDbConfig;
}

impl ConfigProvider for EventDbConfig {
    fn event_db_config(&self) -> EventDbConfig {
        self.clone()
    }
}

/// Configuration that can be replaced while the server runs.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<EventDbConfig>>,
}

impl SharedConfig {
    pub fn new(config: EventDbConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Replace the configuration; picked up at the next session open.
    pub fn set(&self, config: EventDbConfig) {
        *self.inner.write() = config;
    }
}

impl ConfigProvider for SharedConfig {
    fn event_db_config(&self) -> EventDbConfig {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        event_db: EventDbConfig,
    }

    #[test]
    fn parse_store_types() {
        let parsed: Wrapper = toml::from_str(
            r#"
[event_db]
type = "firebird"
path = "/srv/events"
"#,
        )
        .unwrap();
        assert_eq!(parsed.event_db.store_type, StoreType::Firebird);
        assert_eq!(parsed.event_db.store_path, PathBuf::from("/srv/events"));

        let parsed: Wrapper = toml::from_str("[event_db]\ntype = \"mongodb\"\n").unwrap();
        assert_eq!(parsed.event_db.store_type, StoreType::Unknown);
        assert_eq!(parsed.event_db.store_path, PathBuf::from("./data"));
    }

    #[test]
    fn shared_config_updates_are_visible() {
        let shared = SharedConfig::new(EventDbConfig::new(StoreType::Firebird, "/tmp"));
        let handle = shared.clone();
        handle.set(EventDbConfig::new(StoreType::Sqlite, "/tmp"));
        assert_eq!(shared.event_db_config().store_type, StoreType::Sqlite);
    }
}
