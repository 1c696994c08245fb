//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ego_server_handle_total` (counter): requests by server, method, path, code
//! - `ego_server_handle_seconds` (histogram): request latency
//! - `ego_server_up` (gauge): 1 while a server is serving
//! - `ego_job_run_total` / `ego_job_run_seconds`: job executions by outcome
//! - `ego_cron_run_total`: cron iterations by outcome
//! - `ego_resolver_update_total` / `ego_resolver_endpoints`: DNS publications
//! - `ego_limiter_rejected_total` (counter): requests refused by the limiter
//!
//! # Design Decisions
//! - One Prometheus recorder per process, installed on first use
//! - Recording without a recorder is a no-op (the `metrics` facade default)

use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::Error;

static RECORDER: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the Prometheus recorder, or return the one already installed.
pub fn init_recorder() -> Result<PrometheusHandle, Error> {
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| e.to_string())?;
            describe();
            Ok(handle)
        })
        .clone()
        .map_err(Error::Metrics)
}

fn describe() {
    describe_counter!("ego_server_handle_total", "Requests handled by ego servers");
    describe_histogram!("ego_server_handle_seconds", "Request latency of ego servers");
    describe_gauge!("ego_server_up", "Whether a server is currently serving");
    describe_counter!("ego_job_run_total", "Job executions by outcome");
    describe_histogram!("ego_job_run_seconds", "Job execution time");
    describe_counter!("ego_cron_run_total", "Cron iterations by outcome");
    describe_counter!("ego_resolver_update_total", "Endpoint sets published by resolvers");
    describe_gauge!("ego_resolver_endpoints", "Endpoints in the latest published set");
    describe_counter!("ego_limiter_rejected_total", "Requests rejected by the rate limiter");
}

pub fn record_server_request(server: &str, method: &str, path: &str, status: u16, start: Instant) {
    let labels = [
        ("server", server.to_string()),
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("code", status.to_string()),
    ];
    counter!("ego_server_handle_total", &labels).increment(1);
    histogram!("ego_server_handle_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_server_up(server: &str, up: bool) {
    gauge!("ego_server_up", "server" => server.to_string()).set(if up { 1.0 } else { 0.0 });
}

pub fn record_job_run(job: &str, outcome: &'static str, start: Instant) {
    counter!("ego_job_run_total", "job" => job.to_string(), "outcome" => outcome).increment(1);
    histogram!("ego_job_run_seconds", "job" => job.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cron_run(cron: &str, outcome: &'static str) {
    counter!("ego_cron_run_total", "cron" => cron.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_resolver_update(target: &str, endpoints: usize) {
    counter!("ego_resolver_update_total", "target" => target.to_string()).increment(1);
    gauge!("ego_resolver_endpoints", "target" => target.to_string()).set(endpoints as f64);
}

pub fn record_limiter_rejected(server: &str) {
    counter!("ego_limiter_rejected_total", "server" => server.to_string()).increment(1);
}
