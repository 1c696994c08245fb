//! Configuration schema definitions.
//!
//! This module defines the framework-level sections of the configuration
//! file. Component sections (`[server.http]`, `[resolver]`, `[cron.*]`, ...)
//! are read on demand through [`ConfigStore::unmarshal_key`].
//!
//! [`ConfigStore::unmarshal_key`]: crate::config::ConfigStore::unmarshal_key

use serde::{Deserialize, Serialize};

/// Root framework configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EgoConfig {
    /// Application identity overrides (environment wins).
    pub app: AppConfig,

    /// Logger settings.
    pub logger: LoggerConfig,

    /// Prometheus recorder settings.
    pub metrics: MetricsConfig,

    /// Request tracing settings.
    pub trace: TraceConfig,

    /// Per-client rate limiting.
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub name: Option<String>,
    pub mode: Option<String>,
}

/// Logger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Header carrying the request trace id.
    pub header_name: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            header_name: "x-trace-id".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per second per client.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}
