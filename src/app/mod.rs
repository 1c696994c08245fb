//! Application identity.
//!
//! Read once from the `EGO_*` environment when the orchestrator is built
//! and shared read-only through the [`AppContext`](crate::AppContext).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::EgoConfig;

pub const ENV_NAME: &str = "EGO_NAME";
pub const ENV_MODE: &str = "EGO_MODE";
pub const ENV_REGION: &str = "EGO_REGION";
pub const ENV_ZONE: &str = "EGO_ZONE";
pub const ENV_HOST: &str = "EGO_HOST";
pub const ENV_INSTANCE: &str = "EGO_INSTANCE";
pub const ENV_DEBUG: &str = "EGO_DEBUG";
pub const ENV_CONFIG_PATH: &str = "EGO_CONFIG_PATH";
pub const ENV_LOG_PATH: &str = "EGO_LOG_PATH";
pub const ENV_TRACE_HEADER_NAME: &str = "EGO_TRACE_HEADER_NAME";

/// Who this process is and where it runs.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub mode: String,
    pub region: String,
    pub zone: String,
    pub host: String,
    pub instance: String,
    pub debug: bool,
    pub version: &'static str,
    pub pid: u32,
    /// Seconds since the unix epoch.
    pub start_time: u64,
}

impl AppInfo {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let host = var(ENV_HOST)
            .or_else(|| var("HOSTNAME"))
            .unwrap_or_else(|| "localhost".to_string());
        let instance = var(ENV_INSTANCE).unwrap_or_else(|| host.clone());
        let debug = var(ENV_DEBUG)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            name: var(ENV_NAME).unwrap_or_else(default_name),
            mode: var(ENV_MODE).unwrap_or_else(|| "dev".to_string()),
            region: var(ENV_REGION).unwrap_or_default(),
            zone: var(ENV_ZONE).unwrap_or_default(),
            host,
            instance,
            debug,
            version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
            start_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Fill name/mode from the config file where the environment is silent.
    pub fn apply_config(&mut self, config: &EgoConfig, lookup: impl Fn(&str) -> Option<String>) {
        if lookup(ENV_NAME).is_none() {
            if let Some(name) = &config.app.name {
                self.name = name.clone();
            }
        }
        if lookup(ENV_MODE).is_none() {
            if let Some(mode) = &config.app.mode {
                self.mode = mode.clone();
            }
        }
    }

    /// Flat key/value view served by the governor's `/build/info`.
    pub fn build_info(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("name", self.name.clone()),
            ("mode", self.mode.clone()),
            ("region", self.region.clone()),
            ("zone", self.zone.clone()),
            ("host", self.host.clone()),
            ("instance", self.instance.clone()),
            ("version", self.version.to_string()),
            ("pid", self.pid.to_string()),
            ("start_time", self.start_time.to_string()),
            ("framework", format!("ego {}", env!("CARGO_PKG_VERSION"))),
        ])
    }
}

fn default_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let info = AppInfo::from_lookup(lookup(&[
            (ENV_NAME, "svc"),
            (ENV_MODE, "prod"),
            (ENV_REGION, "eu"),
            (ENV_HOST, "10.0.0.1"),
            (ENV_DEBUG, "true"),
        ]));
        assert_eq!(info.name, "svc");
        assert_eq!(info.mode, "prod");
        assert_eq!(info.region, "eu");
        assert_eq!(info.instance, "10.0.0.1");
        assert!(info.debug);
    }

    #[test]
    fn config_fills_gaps_only() {
        let mut config = EgoConfig::default();
        config.app.name = Some("from-config".into());
        config.app.mode = Some("test".into());

        let env = lookup(&[(ENV_MODE, "prod")]);
        let mut info = AppInfo::from_lookup(&env);
        info.apply_config(&config, &env);

        assert_eq!(info.name, "from-config");
        assert_eq!(info.mode, "prod");
        assert!(!info.debug);
    }
}
