//! Server components.
//!
//! # Data Flow
//! ```text
//! Ego::run
//!     → Server::prepare (bind listeners)
//!     → Registrar::register_service(info)
//!     → Server::start (runs until stopped)
//!     → Registrar::unregister_service(info)
//!
//! Ego::stop
//!     → graceful: Server::graceful_stop (bounded by stop timeout, then stop)
//!     → forced:   Server::stop
//! ```
//!
//! # Design Decisions
//! - `start` blocks for the server's whole life; stopping makes it return
//! - Servers are registered with the address `prepare` bound
//! - OrderServers are prepared, started and health-gated one at a time
//! - Components take their settings from an explicit `AppContext`

pub mod governor;
pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::app::AppInfo;
use crate::error::BoxError;

pub use governor::Governor;
pub use http::{HttpServer, HttpServerConfig};

/// What kind of endpoint a server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Unknown,
    Http,
    Grpc,
    Governor,
}

/// Registration record for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub scheme: String,
    pub address: String,
    pub kind: ServiceKind,
    pub region: String,
    pub zone: String,
    pub enabled: bool,
    pub healthy: bool,
    pub metadata: BTreeMap<String, String>,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        scheme: impl Into<String>,
        address: impl Into<String>,
        kind: ServiceKind,
    ) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            address: address.into(),
            kind,
            region: String::new(),
            zone: String::new(),
            enabled: true,
            healthy: true,
            metadata: BTreeMap::new(),
        }
    }

    /// Stamp region/zone and identity metadata from the application.
    pub fn with_app(mut self, app: &AppInfo) -> Self {
        self.region = app.region.clone();
        self.zone = app.zone.clone();
        self.metadata.insert("app".into(), app.name.clone());
        self.metadata.insert("mode".into(), app.mode.clone());
        self.metadata.insert("instance".into(), app.instance.clone());
        self
    }

    pub fn label(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }

    /// Unique key of this registration.
    pub fn registry_key(&self) -> String {
        format!("{}@{}", self.name, self.label())
    }
}

/// A long-running network listener managed by the orchestrator.
#[async_trait]
pub trait Server: Send + Sync {
    fn name(&self) -> &str;

    /// Component family, used in logs.
    fn package_name(&self) -> &'static str;

    /// Acquire resources (bind listeners, ...) before registration and
    /// `start`. Called once.
    async fn prepare(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Serve until stopped. Returning `Err` ends the whole run.
    async fn start(&self) -> Result<(), BoxError>;

    /// Stop immediately.
    async fn stop(&self) -> Result<(), BoxError>;

    /// Stop accepting work and drain; the orchestrator bounds the wait.
    async fn graceful_stop(&self) -> Result<(), BoxError>;

    fn info(&self) -> ServiceInfo;
}

/// A server that must be healthy before the next ordered server starts.
pub trait OrderServer: Server {
    fn health(&self) -> bool;
}

#[async_trait]
impl<T: Server + ?Sized> Server for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn package_name(&self) -> &'static str {
        (**self).package_name()
    }

    async fn prepare(&self) -> Result<(), BoxError> {
        (**self).prepare().await
    }

    async fn start(&self) -> Result<(), BoxError> {
        (**self).start().await
    }

    async fn stop(&self) -> Result<(), BoxError> {
        (**self).stop().await
    }

    async fn graceful_stop(&self) -> Result<(), BoxError> {
        (**self).graceful_stop().await
    }

    fn info(&self) -> ServiceInfo {
        (**self).info()
    }
}

impl<T: OrderServer + ?Sized> OrderServer for std::sync::Arc<T> {
    fn health(&self) -> bool {
        (**self).health()
    }
}
