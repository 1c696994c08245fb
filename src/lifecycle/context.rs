//! Handle shared with every component.

use std::sync::Arc;

use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::app::AppInfo;
use crate::config::{ConfigStore, EgoFlags};
use crate::job::JobRegistry;
use crate::lifecycle::Shutdown;
use crate::security::RateLimiter;

/// Everything the init steps produced: identity, configuration, metrics,
/// limiter, trace header, job registry and the root shutdown signal.
///
/// Cheap to clone. Components receive it explicitly instead of reaching for
/// globals.
#[derive(Clone)]
pub struct AppContext {
    pub(crate) app: Arc<AppInfo>,
    pub(crate) flags: Arc<EgoFlags>,
    pub(crate) config: ConfigStore,
    pub(crate) metrics: Option<PrometheusHandle>,
    pub(crate) limiter: Option<Arc<RateLimiter>>,
    pub(crate) trace_header: HeaderName,
    pub(crate) jobs: JobRegistry,
    pub(crate) shutdown: Shutdown,
}

impl AppContext {
    pub(crate) fn new(app: AppInfo) -> Self {
        Self {
            app: Arc::new(app),
            flags: Arc::new(EgoFlags::default()),
            config: ConfigStore::default(),
            metrics: None,
            limiter: None,
            trace_header: HeaderName::from_static("x-trace-id"),
            jobs: JobRegistry::new(),
            shutdown: Shutdown::new(),
        }
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    pub fn flags(&self) -> &EgoFlags {
        &self.flags
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// `None` when `[metrics] enabled = false`.
    pub fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }

    /// `None` when `[limiter] enabled = false`.
    pub fn limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn trace_header(&self) -> &HeaderName {
        &self.trace_header
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Fires once, at the very end of `Ego::stop`.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(AppInfo::from_env())
    }
}
