//! Periodic DNS resolution of a target into [`Endpoints`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::Error;
use crate::lifecycle::{AppContext, Shutdown};
use crate::observability::metrics;
use crate::resolver::lookup::{Lookup, LookupError, SystemLookup};
use crate::resolver::{parse_target, Balancer, Endpoints, ResolveError, Target};

/// Capacity of the channel endpoints are published on.
const WATCH_CAPACITY: usize = 10;

/// `[resolver.dns]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Re-resolution period.
    pub frequency_ms: u64,
    /// Also look up `_grpclb._tcp.<host>`.
    pub enable_srv_lookups: bool,
    /// Port used when the target names none.
    pub default_port: u16,
    pub lookup_timeout_ms: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            frequency_ms: 120_000,
            enable_srv_lookups: false,
            default_port: 443,
            lookup_timeout_ms: 10_000,
        }
    }
}

impl DnsConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_millis(self.frequency_ms.max(1))
    }
}

pub struct DnsResolver {
    config: DnsConfig,
    lookup: Arc<dyn Lookup>,
}

impl DnsResolver {
    pub fn new(config: DnsConfig) -> Self {
        let lookup = SystemLookup::new(Duration::from_millis(config.lookup_timeout_ms));
        Self::with_lookup(config, Arc::new(lookup))
    }

    pub fn with_lookup(config: DnsConfig, lookup: Arc<dyn Lookup>) -> Self {
        Self { config, lookup }
    }

    /// Build from the config section at `key` (usually `resolver.dns`).
    pub fn load(key: &str, ctx: &AppContext) -> Result<Self, Error> {
        Ok(Self::new(ctx.config().unmarshal_key(key)?))
    }

    /// Resolve `target` now and keep it fresh in the background.
    ///
    /// Only the initial resolution can fail. A literal IP target publishes
    /// one address and starts no background task.
    pub async fn watch_services(&self, target: &str) -> Result<EndpointWatch, ResolveError> {
        let parsed = parse_target(target, self.config.default_port)?;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let stop = Shutdown::new();

        if let Some(ip) = parsed.ip {
            let endpoints = Endpoints {
                target: target.to_string(),
                addresses: vec![SocketAddr::new(ip, parsed.port)],
                balancers: Vec::new(),
            };
            metrics::record_resolver_update(target, 1);
            // Fresh channel: there is room.
            let _ = tx.try_send(endpoints);
            return Ok(EndpointWatch {
                rx,
                resolve_now: None,
                task: None,
                stop,
            });
        }

        let worker = Worker {
            name: target.to_string(),
            target: parsed,
            enable_srv: self.config.enable_srv_lookups,
            lookup: self.lookup.clone(),
        };

        let initial = worker.resolve().await?;
        metrics::record_resolver_update(target, initial.len());
        let _ = tx.try_send(initial);

        let (now_tx, now_rx) = mpsc::channel(1);
        let task = tokio::spawn(worker.run(tx, now_rx, stop.clone(), self.config.frequency()));

        tracing::debug!(target: "ego", resolver = %target, "DNS watch started");
        Ok(EndpointWatch {
            rx,
            resolve_now: Some(now_tx),
            task: Some(task),
            stop,
        })
    }
}

/// Stream of resolutions for one target. Dropping it stops the background loop.
pub struct EndpointWatch {
    rx: mpsc::Receiver<Endpoints>,
    resolve_now: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stop: Shutdown,
}

impl EndpointWatch {
    /// Next published endpoint set; `None` once the watch has ended.
    pub async fn recv(&mut self) -> Option<Endpoints> {
        self.rx.recv().await
    }

    /// Ask for an immediate re-resolution. Requests made before the loop
    /// gets to them collapse into one.
    pub fn resolve_now(&self) {
        if let Some(tx) = &self.resolve_now {
            let _ = tx.try_send(());
        }
    }

    /// True for literal-IP targets, which are never re-resolved.
    pub fn is_static(&self) -> bool {
        self.task.is_none()
    }

    pub fn close(&self) {
        self.stop.trigger();
    }
}

impl Drop for EndpointWatch {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

struct Worker {
    name: String,
    target: Target,
    enable_srv: bool,
    lookup: Arc<dyn Lookup>,
}

impl Worker {
    async fn run(
        self,
        tx: mpsc::Sender<Endpoints>,
        mut resolve_now: mpsc::Receiver<()>,
        stop: Shutdown,
        frequency: Duration,
    ) {
        let mut ticker = time::interval_at(Instant::now() + frequency, frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
                request = resolve_now.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            let endpoints = match self.resolve().await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::warn!(target: "ego", resolver = %self.name, error = %e, "DNS re-resolution failed, keeping previous endpoints");
                    continue;
                }
            };

            metrics::record_resolver_update(&self.name, endpoints.len());
            tokio::select! {
                _ = stop.cancelled() => break,
                sent = tx.send(endpoints) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(target: "ego", resolver = %self.name, "DNS watch stopped");
    }

    async fn resolve(&self) -> Result<Endpoints, ResolveError> {
        let balancers = if self.enable_srv {
            self.lookup_balancers().await?
        } else {
            Vec::new()
        };

        let addresses = match self.lookup.lookup_host(&self.target.host).await {
            Ok(ips) => ips
                .into_iter()
                .map(|ip| SocketAddr::new(ip, self.target.port))
                .collect(),
            Err(e) if !e.is_transient() => {
                tracing::debug!(target: "ego", resolver = %self.name, error = %e, "Host lookup found nothing");
                Vec::new()
            }
            Err(e) if balancers.is_empty() => return Err(self.failed(e)),
            Err(e) => {
                tracing::warn!(target: "ego", resolver = %self.name, error = %e, "Host lookup failed, using SRV balancers only");
                Vec::new()
            }
        };

        Ok(Endpoints {
            target: self.name.clone(),
            addresses,
            balancers,
        })
    }

    async fn lookup_balancers(&self) -> Result<Vec<Balancer>, ResolveError> {
        let records = match self.lookup.lookup_srv("grpclb", "tcp", &self.target.host).await {
            Ok(records) => records,
            Err(e) if e.is_transient() => return Err(self.failed(e)),
            Err(e) => {
                tracing::debug!(target: "ego", resolver = %self.name, error = %e, "SRV lookup found nothing");
                return Ok(Vec::new());
            }
        };

        let mut balancers = Vec::new();
        for record in records {
            let ips = match self.lookup.lookup_host(&record.target).await {
                Ok(ips) => ips,
                Err(e) if e.is_transient() => return Err(self.failed(e)),
                Err(_) => continue,
            };
            let server_name = record.target.trim_end_matches('.').to_string();
            balancers.extend(ips.into_iter().map(|ip| Balancer {
                addr: SocketAddr::new(ip, record.port),
                server_name: server_name.clone(),
            }));
        }
        Ok(balancers)
    }

    fn failed(&self, source: LookupError) -> ResolveError {
        ResolveError::Lookup {
            target: self.name.clone(),
            source,
        }
    }
}
