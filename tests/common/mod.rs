//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ego::server::{OrderServer, Server, ServiceInfo, ServiceKind};
use ego::{BoxError, Ego, EgoBuilder, Shutdown};
use parking_lot::Mutex;
use tempfile::NamedTempFile;

/// Config that keeps test output quiet.
pub const QUIET: &str = "[logger]\nlevel = \"warn\"\n";

pub fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Builder reading `config` and parsing `extra` as command-line flags.
pub fn builder(config: &NamedTempFile, extra: &[&str]) -> EgoBuilder {
    let mut args = vec![
        "ego-test".to_string(),
        "--config".to_string(),
        config.path().display().to_string(),
    ];
    args.extend(extra.iter().map(|arg| arg.to_string()));
    Ego::builder().disable_banner().args(args)
}

/// Ordered record of what the test components did.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }
}

/// Scriptable server.
pub struct TestServer {
    name: String,
    events: Events,
    fail_after: Option<Duration>,
    hang_on_graceful: bool,
    never_healthy: bool,
    healthy: AtomicBool,
    stop: Shutdown,
}

impl TestServer {
    pub fn new(name: &str, events: &Events) -> Self {
        Self {
            name: name.to_string(),
            events: events.clone(),
            fail_after: None,
            hang_on_graceful: false,
            never_healthy: false,
            healthy: AtomicBool::new(false),
            stop: Shutdown::new(),
        }
    }

    /// `start` returns `Err("boom")` after `delay`.
    pub fn failing_after(mut self, delay: Duration) -> Self {
        self.fail_after = Some(delay);
        self
    }

    /// `graceful_stop` never finishes.
    pub fn hanging_graceful_stop(mut self) -> Self {
        self.hang_on_graceful = true;
        self
    }

    pub fn never_healthy(mut self) -> Self {
        self.never_healthy = true;
        self
    }
}

#[async_trait]
impl Server for TestServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn package_name(&self) -> &'static str {
        "server.test"
    }

    async fn prepare(&self) -> Result<(), BoxError> {
        self.events.push(format!("prepare:{}", self.name));
        Ok(())
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.events.push(format!("start:{}", self.name));
        self.healthy.store(!self.never_healthy, Ordering::SeqCst);

        if let Some(delay) = self.fail_after {
            tokio::time::sleep(delay).await;
            return Err("boom".into());
        }

        self.stop.cancelled().await;
        self.events.push(format!("exit:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.events.push(format!("stop:{}", self.name));
        self.stop.trigger();
        Ok(())
    }

    async fn graceful_stop(&self) -> Result<(), BoxError> {
        self.events.push(format!("graceful_stop:{}", self.name));
        if self.hang_on_graceful {
            std::future::pending::<()>().await;
        }
        self.stop.trigger();
        Ok(())
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo::new(&self.name, "test", "127.0.0.1:0", ServiceKind::Unknown)
    }
}

impl OrderServer for TestServer {
    fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
