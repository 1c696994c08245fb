//! HTTP server component.
//!
//! # Responsibilities
//! - Read `[server.<name>]` (host, port, request timeout, limiter toggle)
//! - Bind the listener in `prepare` (or lazily in `start`)
//! - Wire middleware: request metrics, timeout, rate limit, trace id, spans
//! - Serve until stopped, draining connections on a graceful stop
//!
//! # Design Decisions
//! - Healthy exactly while the accept loop runs
//! - Forced stop drops the accept loop without draining
//! - Port 0 binds an ephemeral port; `local_addr` reports the real one

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::app::AppInfo;
use crate::error::{BoxError, Error};
use crate::lifecycle::{AppContext, Shutdown};
use crate::observability::{metrics, tracing::request_id_layers};
use crate::security::rate_limit::{rate_limit_middleware, LimiterState};
use crate::server::{OrderServer, Server, ServiceInfo, ServiceKind};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9090;

/// `[server.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Falls back to `--host`, then `0.0.0.0`.
    pub host: Option<String>,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Apply the process-wide `[limiter]` to this server.
    pub enable_limiter: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            request_timeout_secs: 30,
            enable_limiter: false,
        }
    }
}

impl HttpServerConfig {
    pub fn address(&self) -> String {
        let host = self.host.as_deref().unwrap_or(DEFAULT_HOST);
        if host.contains(':') {
            format!("[{host}]:{}", self.port)
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Options for an [`HttpServer`].
pub struct HttpServerBuilder {
    name: String,
    kind: ServiceKind,
    config: HttpServerConfig,
    router: Router,
    ctx: AppContext,
}

impl HttpServerBuilder {
    pub fn new(name: impl Into<String>, ctx: &AppContext) -> Self {
        let mut config = HttpServerConfig::default();
        config.host = ctx.flags().host.clone();
        Self {
            name: name.into(),
            kind: ServiceKind::Http,
            config,
            router: Router::new(),
            ctx: ctx.clone(),
        }
    }

    pub fn config(mut self, config: HttpServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Merge `router` into the routes served.
    pub fn router(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    pub fn kind(mut self, kind: ServiceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> HttpServer {
        let router = wire_middleware(&self.name, &self.config, &self.ctx, self.router);
        HttpServer {
            name: self.name,
            kind: self.kind,
            config: self.config,
            app: self.ctx.app.clone(),
            router: Mutex::new(Some(router)),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
            serving: AtomicBool::new(false),
            graceful: Shutdown::new(),
            forced: Shutdown::new(),
            finished: Shutdown::new(),
        }
    }
}

/// Axum server managed by the orchestrator.
pub struct HttpServer {
    name: String,
    kind: ServiceKind,
    config: HttpServerConfig,
    app: Arc<AppInfo>,
    router: Mutex<Option<Router>>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
    serving: AtomicBool,
    graceful: Shutdown,
    forced: Shutdown,
    finished: Shutdown,
}

impl HttpServer {
    pub fn builder(name: impl Into<String>, ctx: &AppContext) -> HttpServerBuilder {
        HttpServerBuilder::new(name, ctx)
    }

    /// Start a builder from the config section at `key` (e.g. `server.http`).
    pub fn load(key: &str, ctx: &AppContext) -> Result<HttpServerBuilder, Error> {
        let mut config: HttpServerConfig = ctx.config().unmarshal_key(key)?;
        if config.host.is_none() {
            config.host = ctx.flags().host.clone();
        }
        Ok(HttpServerBuilder::new(key, ctx).config(config))
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Bound address, once `prepare` or `start` has bound the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn bind(&self) -> Result<TcpListener, BoxError> {
        let address = self.config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| format!("{}: failed to bind {address}: {e}", self.name))?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        Ok(listener)
    }
}

#[async_trait]
impl Server for HttpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn package_name(&self) -> &'static str {
        "server.http"
    }

    async fn prepare(&self) -> Result<(), BoxError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }
        let listener = self.bind().await?;
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    async fn start(&self) -> Result<(), BoxError> {
        let router = self
            .router
            .lock()
            .take()
            .ok_or_else(|| format!("{}: server already started", self.name))?;
        let prepared = self.listener.lock().take();
        let listener = match prepared {
            Some(listener) => listener,
            None => self.bind().await?,
        };
        let address = listener.local_addr()?;
        self.started.store(true, Ordering::SeqCst);

        tracing::info!(target: "ego", server = %self.name, address = %address, "HTTP server starting");
        self.serving.store(true, Ordering::SeqCst);
        metrics::record_server_up(&self.name, true);

        let graceful = self.graceful.clone();
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .into_future();

        let result = tokio::select! {
            res = serve => res.map_err(BoxError::from),
            _ = self.forced.cancelled() => {
                tracing::warn!(target: "ego", server = %self.name, "HTTP server stopped without draining");
                Ok(())
            }
        };

        self.serving.store(false, Ordering::SeqCst);
        metrics::record_server_up(&self.name, false);
        self.finished.trigger();
        tracing::info!(target: "ego", server = %self.name, "HTTP server stopped");
        result
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.forced.trigger();
        if self.started.load(Ordering::SeqCst) {
            self.finished.cancelled().await;
        }
        Ok(())
    }

    async fn graceful_stop(&self) -> Result<(), BoxError> {
        self.graceful.trigger();
        if self.started.load(Ordering::SeqCst) {
            self.finished.cancelled().await;
        }
        Ok(())
    }

    fn info(&self) -> ServiceInfo {
        let address = self
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.config.address());
        ServiceInfo::new(&self.name, "http", address, self.kind)
            .with_app(&self.app)
    }
}

impl OrderServer for HttpServer {
    fn health(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

/// Build the middleware stack around the user routes.
#[allow(deprecated)]
fn wire_middleware(
    name: &str,
    config: &HttpServerConfig,
    ctx: &AppContext,
    router: Router,
) -> Router {
    let server: Arc<str> = Arc::from(name);
    let mut router = router
        .layer(middleware::from_fn_with_state(server.clone(), track_requests))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)));

    if config.enable_limiter {
        match ctx.limiter() {
            Some(limiter) => {
                let state = LimiterState {
                    limiter: limiter.clone(),
                    server,
                };
                router = router.layer(middleware::from_fn_with_state(state, rate_limit_middleware));
            }
            None => tracing::warn!(
                target: "ego",
                server = %name,
                "enable_limiter is set but [limiter] is disabled, serving without limits"
            ),
        }
    }

    let (set_id, propagate_id) = request_id_layers(ctx.trace_header().clone());
    router
        .layer(TraceLayer::new_for_http())
        .layer(propagate_id)
        .layer(set_id)
}

/// Count and time every request by matched route.
async fn track_requests(
    State(server): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_server_request(&server, &method, &path, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use tower::ServiceExt;

    fn hello() -> Router {
        Router::new().route("/hello", get(|| async { "hello" }))
    }

    #[test]
    fn config_defaults_and_ipv6_address() {
        let config = HttpServerConfig::default();
        assert_eq!(config.address(), "0.0.0.0:9090");

        let config = HttpServerConfig {
            host: Some("::1".into()),
            port: 80,
            ..Default::default()
        };
        assert_eq!(config.address(), "[::1]:80");
    }

    #[test]
    fn load_reads_section_and_host_flag() {
        let mut ctx = AppContext::default();
        ctx.flags = Arc::new(crate::config::EgoFlags::parse_args(["app", "--host", "127.0.0.1"]).unwrap());
        ctx.config()
            .replace(crate::config::loader::parse_config("[server.http]\nport = 8081\n").unwrap());

        let server = HttpServer::load("server.http", &ctx).unwrap().build();
        assert_eq!(server.config().port, 8081);
        assert_eq!(server.config().address(), "127.0.0.1:8081");
        assert_eq!(server.name(), "server.http");
    }

    #[tokio::test]
    async fn trace_id_is_set_and_echoed() {
        let ctx = AppContext::default();
        let server = HttpServer::builder("api", &ctx).router(hello()).build();
        let router = server.router.lock().take().unwrap();

        let response = router
            .clone()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-trace-id"));

        let response = router
            .oneshot(
                Request::get("/hello")
                    .header("x-trace-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-trace-id"], "abc");
    }

    #[tokio::test]
    async fn health_follows_serving_state() {
        let ctx = AppContext::default();
        let server = Arc::new(
            HttpServer::builder("api", &ctx)
                .host("127.0.0.1")
                .port(0)
                .router(hello())
                .build(),
        );

        server.prepare().await.unwrap();
        assert!(server.local_addr().is_some());
        assert!(!server.health());

        let task = tokio::spawn({
            let server = server.clone();
            async move { server.start().await }
        });
        while !server.health() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        server.graceful_stop().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(!server.health());
    }
}
