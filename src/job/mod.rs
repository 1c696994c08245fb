//! One-shot jobs.
//!
//! # Data Flow
//! ```text
//! Ego::job(job)  → JobRegistry
//!
//! --job=a,b (no order servers)
//!     → Ego runs a and b in parallel, fail-fast, then exits
//!
//! POST /jobs on the governor
//!     → handler.rs looks the job up and dispatches it
//! ```
//!
//! # Design Decisions
//! - Jobs receive a `JobContext` carrying their run id and the root shutdown
//! - Every execution is logged and counted (`ego_job_run_total`)

pub mod handler;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{BoxError, Error};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

pub use handler::{trigger_job, JobTrigger, HEADER_JOB_ERR, HEADER_JOB_NAME, HEADER_JOB_RUN_ID};

/// A named one-shot task.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: JobContext) -> Result<(), BoxError>;
}

/// Per-execution context handed to a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub name: String,
    pub run_id: String,
    shutdown: Shutdown,
}

impl JobContext {
    pub fn new(name: impl Into<String>, run_id: impl Into<String>, shutdown: Shutdown) -> Self {
        Self {
            name: name.into(),
            run_id: run_id.into(),
            shutdown,
        }
    }

    /// Whether the application has finished stopping.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }
}

/// A job backed by an async closure. Build one with [`job_fn`].
pub struct FnJob<F> {
    name: String,
    f: F,
}

pub fn job_fn<F, Fut>(name: impl Into<String>, f: F) -> FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnJob {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: JobContext) -> Result<(), BoxError> {
        (self.f)(ctx).await
    }
}

/// Shared name → job map.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<BTreeMap<String, Arc<dyn Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under its name, replacing any previous one.
    pub fn register(&self, job: Arc<dyn Job>) {
        let name = job.name().to_string();
        if self.jobs.write().insert(name.clone(), job).is_some() {
            tracing::warn!(target: "ego", job = %name, "Job registered twice, keeping the last one");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

/// Run one job execution with logging and metrics.
pub async fn execute(job: Arc<dyn Job>, ctx: JobContext) -> Result<(), Error> {
    let start = Instant::now();
    let name = ctx.name.clone();
    let run_id = ctx.run_id.clone();
    tracing::info!(target: "ego", job = %name, run_id = %run_id, "Job started");

    match job.run(ctx).await {
        Ok(()) => {
            tracing::info!(
                target: "ego",
                job = %name,
                run_id = %run_id,
                elapsed = ?start.elapsed(),
                "Job finished"
            );
            metrics::record_job_run(&name, "success", start);
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                target: "ego",
                job = %name,
                run_id = %run_id,
                error = %e,
                elapsed = ?start.elapsed(),
                "Job failed"
            );
            metrics::record_job_run(&name, "failure", start);
            Err(Error::Component(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn execute_reports_failure() {
        let job: Arc<dyn Job> = Arc::new(job_fn("broken", |_ctx| async {
            Err::<(), BoxError>("disk full".into())
        }));
        let ctx = JobContext::new("broken", "run-1", Shutdown::new());

        let err = execute(job, ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn registry_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = JobRegistry::new();
        registry.register(Arc::new(job_fn("count", move |ctx| {
            let counter = counter.clone();
            async move {
                assert_eq!(ctx.run_id, "r");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));

        assert_eq!(registry.names(), ["count"]);
        assert!(registry.get("missing").is_none());

        let job = registry.get("count").unwrap();
        execute(job, JobContext::new("count", "r", Shutdown::new()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
