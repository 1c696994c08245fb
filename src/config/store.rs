//! Shared, hot-swappable configuration.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::loader::ConfigError;
use crate::config::schema::EgoConfig;

/// One loaded configuration: the typed framework sections plus the raw
/// table components read their own sections from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub config: EgoConfig,
    pub raw: toml::Table,
    pub source: Option<PathBuf>,
}

impl ConfigSnapshot {
    /// Look up a dotted key such as `server.http`.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut value = self.raw.get(parts.next()?)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    /// Deserialize the section at `key`. A missing section deserializes
    /// from an empty table, so `#[serde(default)]` types get their defaults.
    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .get(key)
            .cloned()
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        value.try_into().map_err(|source| ConfigError::Key {
            key: key.to_string(),
            source,
        })
    }
}

/// Cloneable handle over the current [`ConfigSnapshot`].
///
/// Readers never block: snapshots are swapped atomically on reload and a
/// revision counter notifies subscribers.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: Arc<ArcSwap<ConfigSnapshot>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
            revision: Arc::new(revision),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Current framework sections.
    pub fn config(&self) -> EgoConfig {
        self.current.load().config.clone()
    }

    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.current.load().unmarshal_key(key)
    }

    /// Swap in a new snapshot and notify subscribers.
    pub fn replace(&self, snapshot: ConfigSnapshot) {
        self.current.store(Arc::new(snapshot));
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Receiver that changes every time the config is replaced.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Section {
        port: u16,
        host: String,
    }

    impl Default for Section {
        fn default() -> Self {
            Self {
                port: 1,
                host: "localhost".into(),
            }
        }
    }

    #[test]
    fn unmarshal_nested_key() {
        let snapshot = parse_config("[server.http]\nport = 9091\n").unwrap();
        let store = ConfigStore::new(snapshot);

        let section: Section = store.unmarshal_key("server.http").unwrap();
        assert_eq!(section.port, 9091);
        assert_eq!(section.host, "localhost");

        let missing: Section = store.unmarshal_key("server.grpc").unwrap();
        assert_eq!(missing, Section::default());
    }

    #[test]
    fn wrong_type_names_the_key() {
        let store = ConfigStore::new(parse_config("[server.http]\nport = \"x\"\n").unwrap());
        let err = store.unmarshal_key::<Section>("server.http").unwrap_err();
        assert!(err.to_string().contains("server.http"));
    }

    #[test]
    fn replace_bumps_revision() {
        let store = ConfigStore::default();
        let rx = store.subscribe();
        store.replace(parse_config("[logger]\nlevel = \"warn\"\n").unwrap());

        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.config().logger.level, "warn");
    }
}
