//! Governor: the operator-facing HTTP server.
//!
//! # Routes
//! - `GET /routes`: routes served by the governor
//! - `GET /configs`: the loaded config file as JSON
//! - `GET /debug/env`: process environment
//! - `GET /build/info`: application identity and version
//! - `GET /metrics`: Prometheus exposition
//! - `GET /health`: liveness
//! - `POST /jobs`: trigger a registered job
//!
//! Wraps an [`HttpServer`] and delegates every lifecycle call to it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error};
use crate::job::{trigger_job, JobTrigger};
use crate::lifecycle::AppContext;
use crate::server::http::{HttpServer, HttpServerBuilder, HttpServerConfig};
use crate::server::{OrderServer, Server, ServiceInfo, ServiceKind};

pub const DEFAULT_GOVERNOR_PORT: u16 = 9003;

/// `[server.governor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub host: Option<String>,
    pub port: u16,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_GOVERNOR_PORT,
        }
    }
}

/// A route listed by `/routes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: &'static str,
    pub path: String,
}

const BUILTIN_ROUTES: [(&str, &str); 7] = [
    ("GET", "/routes"),
    ("GET", "/configs"),
    ("GET", "/debug/env"),
    ("GET", "/build/info"),
    ("GET", "/metrics"),
    ("GET", "/health"),
    ("POST", "/jobs"),
];

#[derive(Clone)]
struct GovernorState {
    ctx: AppContext,
    routes: Arc<Vec<RouteInfo>>,
}

/// Options for a [`Governor`].
pub struct GovernorBuilder {
    inner: HttpServerBuilder,
    ctx: AppContext,
    extra: Router,
    routes: Vec<RouteInfo>,
}

impl GovernorBuilder {
    /// Serve an extra operator route next to the built-in ones.
    pub fn route(mut self, method: &'static str, path: &str, handler: MethodRouter) -> Self {
        self.routes.push(RouteInfo {
            method,
            path: path.to_string(),
        });
        self.extra = self.extra.route(path, handler);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner = self.inner.port(port);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.inner = self.inner.host(host);
        self
    }

    pub fn build(self) -> Governor {
        let mut routes: Vec<RouteInfo> = BUILTIN_ROUTES
            .iter()
            .map(|&(method, path)| RouteInfo {
                method,
                path: path.to_string(),
            })
            .collect();
        routes.extend(self.routes);

        let router = governor_router(self.ctx, routes).merge(self.extra);
        Governor {
            inner: self.inner.kind(ServiceKind::Governor).router(router).build(),
        }
    }
}

/// Operator HTTP server.
pub struct Governor {
    inner: HttpServer,
}

impl Governor {
    pub fn builder(ctx: &AppContext) -> GovernorBuilder {
        Self::with_config("governor", GovernorConfig::default(), ctx)
    }

    /// Start a builder from the config section at `key` (usually `server.governor`).
    pub fn load(key: &str, ctx: &AppContext) -> Result<GovernorBuilder, Error> {
        let config: GovernorConfig = ctx.config().unmarshal_key(key)?;
        Ok(Self::with_config(key, config, ctx))
    }

    fn with_config(name: &str, config: GovernorConfig, ctx: &AppContext) -> GovernorBuilder {
        let http = HttpServerConfig {
            host: config.host.or_else(|| ctx.flags().host.clone()),
            port: config.port,
            ..Default::default()
        };
        GovernorBuilder {
            inner: HttpServer::builder(name, ctx).config(http),
            ctx: ctx.clone(),
            extra: Router::new(),
            routes: Vec::new(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl Server for Governor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn package_name(&self) -> &'static str {
        "server.governor"
    }

    async fn prepare(&self) -> Result<(), BoxError> {
        self.inner.prepare().await
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.inner.start().await
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.inner.stop().await
    }

    async fn graceful_stop(&self) -> Result<(), BoxError> {
        self.inner.graceful_stop().await
    }

    fn info(&self) -> ServiceInfo {
        self.inner.info()
    }
}

impl OrderServer for Governor {
    fn health(&self) -> bool {
        self.inner.health()
    }
}

fn governor_router(ctx: AppContext, routes: Vec<RouteInfo>) -> Router {
    let jobs = Router::new()
        .route("/jobs", post(trigger_job))
        .with_state(JobTrigger::new(ctx.jobs().clone(), ctx.shutdown().clone()));

    let state = GovernorState {
        ctx,
        routes: Arc::new(routes),
    };
    Router::new()
        .route("/routes", get(list_routes))
        .route("/configs", get(show_configs))
        .route("/debug/env", get(show_env))
        .route("/build/info", get(build_info))
        .route("/metrics", get(render_metrics))
        .route("/health", get(health))
        .with_state(state)
        .merge(jobs)
}

async fn list_routes(State(state): State<GovernorState>) -> Json<Vec<RouteInfo>> {
    Json(state.routes.as_ref().clone())
}

async fn show_configs(State(state): State<GovernorState>) -> Json<toml::Table> {
    Json(state.ctx.config().load().raw.clone())
}

async fn show_env() -> Json<BTreeMap<String, String>> {
    Json(std::env::vars().collect())
}

async fn build_info(State(state): State<GovernorState>) -> Json<BTreeMap<&'static str, String>> {
    Json(state.ctx.app().build_info())
}

async fn render_metrics(State(state): State<GovernorState>) -> Response {
    match state.ctx.metrics() {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics are disabled").into_response(),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(router: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn default_port() {
        let ctx = AppContext::default();
        let governor = Governor::load("server.governor", &ctx).unwrap().build();
        assert_eq!(governor.inner.config().port, DEFAULT_GOVERNOR_PORT);
        assert_eq!(governor.info().kind, ServiceKind::Governor);
    }

    #[tokio::test]
    async fn serves_build_info_and_routes() {
        let ctx = AppContext::default();
        let router = governor_router(ctx.clone(), vec![RouteInfo {
            method: "GET",
            path: "/routes".into(),
        }]);

        let (status, info) = get_json(router.clone(), "/build/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["name"], ctx.app().name.as_str());

        let (_, routes) = get_json(router, "/routes").await;
        assert_eq!(routes[0]["path"], "/routes");
    }

    #[tokio::test]
    async fn configs_show_raw_file() {
        let ctx = AppContext::default();
        ctx.config().replace(
            crate::config::loader::parse_config("[server.http]\nport = 8081\n").unwrap(),
        );

        let (_, configs) = get_json(governor_router(ctx, Vec::new()), "/configs").await;
        assert_eq!(configs["server"]["http"]["port"], 8081);
    }

    #[tokio::test]
    async fn metrics_unavailable_without_recorder() {
        let ctx = AppContext::default();
        let (status, _) = get_json(governor_router(ctx, Vec::new()), "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
