//! Periodic tasks.
//!
//! # Design Decisions
//! - A cron's `start` loops until `stop` is called; the orchestrator runs it
//!   as a Cycle task after every server is up
//! - A failed iteration is logged and counted, the schedule goes on
//! - Missed ticks are skipped, iterations never overlap
//! - An iteration in flight when `stop` arrives is allowed to finish

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::validation::ValidationError;
use crate::config::ConfigError;
use crate::error::{BoxError, Error};
use crate::lifecycle::{AppContext, Shutdown};
use crate::observability::metrics;

/// A recurring background activity.
#[async_trait]
pub trait Cron: Send + Sync {
    fn name(&self) -> &str;

    /// Run the schedule until [`Cron::stop`] is called.
    async fn start(&self) -> Result<(), BoxError>;

    async fn stop(&self) -> Result<(), BoxError>;
}

type TaskFn = dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send + Sync;

/// `[cron.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalCronConfig {
    pub interval_ms: u64,
    /// Run once right away instead of waiting one period.
    pub immediately: bool,
}

impl Default for IntervalCronConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            immediately: false,
        }
    }
}

/// Runs a task on a fixed period.
pub struct IntervalCron {
    name: String,
    interval: Duration,
    immediately: bool,
    task: Box<TaskFn>,
    stop: Shutdown,
}

impl IntervalCron {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval: interval.max(Duration::from_millis(1)),
            immediately: false,
            task: Box::new(move || Box::pin(task())),
            stop: Shutdown::new(),
        }
    }

    /// Build from the config section at `key`.
    pub fn load<F, Fut>(key: &str, ctx: &AppContext, task: F) -> Result<Self, Error>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let config: IntervalCronConfig = ctx.config().unmarshal_key(key)?;
        if config.interval_ms == 0 {
            return Err(ConfigError::Validation(vec![ValidationError {
                field: "cron.interval_ms",
                reason: format!("`{key}` needs an interval greater than zero"),
            }])
            .into());
        }

        Ok(Self::new(key, Duration::from_millis(config.interval_ms), task)
            .immediately(config.immediately))
    }

    pub fn immediately(mut self, immediately: bool) -> Self {
        self.immediately = immediately;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) {
        match (self.task)().await {
            Ok(()) => {
                tracing::debug!(target: "ego", cron = %self.name, "Cron iteration finished");
                metrics::record_cron_run(&self.name, "success");
            }
            Err(e) => {
                tracing::warn!(target: "ego", cron = %self.name, error = %e, "Cron iteration failed");
                metrics::record_cron_run(&self.name, "failure");
            }
        }
    }
}

#[async_trait]
impl Cron for IntervalCron {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), BoxError> {
        let first = if self.immediately {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut ticker = time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            target: "ego",
            cron = %self.name,
            interval = ?self.interval,
            immediately = self.immediately,
            "Cron started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                _ = self.stop.cancelled() => break,
            }
        }

        tracing::info!(target: "ego", cron = %self.name, "Cron stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.stop.trigger();
        Ok(())
    }
}
