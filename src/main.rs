//! Demo application.
//!
//! Serves `GET /hello` on `[server.http]`, the governor on
//! `[server.governor]`, logs a heartbeat from `[cron.heartbeat]` and
//! registers the `hello` and `fail` jobs (run them with `--job=hello`).
//! `[demo] stop_delay_ms` delays the stop sequence.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use serde::Deserialize;

use ego::cron::IntervalCron;
use ego::job::job_fn;
use ego::server::{Governor, HttpServer};
use ego::{BoxError, Ego, Error};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DemoConfig {
    greeting: String,
    stop_delay_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            greeting: "hello from ego".to_string(),
            stop_delay_ms: 0,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let ego = Ego::builder().build();

    if let Err(e) = setup(&ego) {
        eprintln!("ego: {e}");
        return ExitCode::FAILURE;
    }

    match ego.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ego: {e}");
            ExitCode::FAILURE
        }
    }
}

fn setup(ego: &Ego) -> Result<(), Error> {
    let ctx = ego.context();
    let demo: DemoConfig = ctx.config().unmarshal_key("demo")?;

    let greeting: Arc<str> = Arc::from(demo.greeting);
    let hello = Router::new().route(
        "/hello",
        get(move || {
            let greeting = greeting.clone();
            async move { greeting.to_string() }
        }),
    );

    ego.serve(HttpServer::load("server.http", ctx)?.router(hello).build())
        .serve(Governor::load("server.governor", ctx)?.build())
        .cron(IntervalCron::load("cron.heartbeat", ctx, || async {
            tracing::info!("heartbeat");
            Ok(())
        })?)
        .job(job_fn("hello", |job| async move {
            tracing::info!(run_id = %job.run_id, "hello from a job");
            Ok(())
        }))
        .job(job_fn("fail", |_job| async {
            Err::<(), BoxError>("this job always fails".into())
        }));

    if demo.stop_delay_ms > 0 {
        let delay = Duration::from_millis(demo.stop_delay_ms);
        ego.before_stop_clean(move || async move {
            tracing::info!(delay = ?delay, "Delaying stop");
            tokio::time::sleep(delay).await;
            Ok(())
        });
    }

    Ok(())
}
