//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::{load_config, ConfigError};
use crate::config::store::ConfigStore;

/// Reloads the config file into a [`ConfigStore`] whenever it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    store: ConfigStore,
}

impl ConfigWatcher {
    pub fn new(path: &Path, store: ConfigStore) -> Self {
        Self {
            path: path.to_path_buf(),
            store,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for reloads to continue.
    /// Invalid files are logged and the current configuration is kept.
    pub fn run(self) -> Result<RecommendedWatcher, ConfigError> {
        let store = self.store.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(target: "ego", path = %path.display(), "Config file change detected, reloading");
                        match load_config(&path) {
                            Ok(snapshot) => store.replace(snapshot),
                            Err(e) => {
                                tracing::error!(target: "ego", error = %e, "Failed to reload config, keeping current configuration");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(target: "ego", error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(target: "ego", path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}
