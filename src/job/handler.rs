//! HTTP trigger for jobs (`POST /jobs` on the governor).

use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::job::{execute, JobContext, JobRegistry};
use crate::lifecycle::Shutdown;

pub const HEADER_JOB_NAME: HeaderName = HeaderName::from_static("x-ego-job-name");
pub const HEADER_JOB_RUN_ID: HeaderName = HeaderName::from_static("x-ego-job-runid");
pub const HEADER_JOB_ERR: HeaderName = HeaderName::from_static("x-ego-job-err");

/// How long a triggered job may keep running once shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// State for [`trigger_job`].
#[derive(Clone, Debug)]
pub struct JobTrigger {
    jobs: JobRegistry,
    shutdown: Shutdown,
}

impl JobTrigger {
    pub fn new(jobs: JobRegistry, shutdown: Shutdown) -> Self {
        Self { jobs, shutdown }
    }
}

/// Dispatch the job named by `X-Ego-Job-Name` and answer right away.
///
/// Both job headers are echoed. Missing headers or an unknown job give
/// 400 with the reason in `X-Ego-Job-Err`. The job itself runs in the
/// background; its outcome only shows up in logs and metrics. A job still
/// running a short grace period after shutdown is abandoned with a warning.
pub async fn trigger_job(State(trigger): State<JobTrigger>, headers: HeaderMap) -> Response {
    let name = headers.get(&HEADER_JOB_NAME).cloned();
    let run_id = headers.get(&HEADER_JOB_RUN_ID).cloned();

    let mut echo = HeaderMap::new();
    if let Some(value) = &name {
        echo.insert(HEADER_JOB_NAME, value.clone());
    }
    if let Some(value) = &run_id {
        echo.insert(HEADER_JOB_RUN_ID, value.clone());
    }

    let Some(name) = name.as_ref().and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) else {
        return reject(echo, "missing X-Ego-Job-Name header");
    };
    let Some(run_id) = run_id.as_ref().and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
    else {
        return reject(echo, "missing X-Ego-Job-RunID header");
    };
    let Some(job) = trigger.jobs.get(name) else {
        return reject(echo, &format!("job not found: {name}"));
    };

    tracing::info!(target: "ego", job = %name, run_id = %run_id, "Job triggered over HTTP");
    let ctx = JobContext::new(name, run_id, trigger.shutdown.clone());
    let shutdown = trigger.shutdown.clone();
    let (name, run_id) = (name.to_string(), run_id.to_string());
    tokio::spawn(async move {
        // Failures are logged and counted by `execute`.
        let run = execute(job, ctx);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => return,
            _ = shutdown.cancelled() => {}
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, run).await.is_err() {
            tracing::warn!(
                target: "ego",
                job = %name,
                run_id = %run_id,
                grace = ?SHUTDOWN_GRACE,
                "Shutdown overtook running job, abandoning it"
            );
        }
    });

    (StatusCode::OK, echo).into_response()
}

fn reject(mut headers: HeaderMap, reason: &str) -> Response {
    tracing::warn!(target: "ego", reason = %reason, "Job trigger rejected");
    let value = HeaderValue::from_str(reason)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid job request"));
    headers.insert(HEADER_JOB_ERR, value);
    (StatusCode::BAD_REQUEST, headers).into_response()
}
