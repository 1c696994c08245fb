//! Startup orchestration.
//!
//! # Responsibilities
//! - Run the fixed init sequence when an `Ego` is built:
//!   parse_flags → print_banner → load_config → init_logger → init_metrics
//!   → init_tracer → init_limiter
//! - Fill the `AppContext` as the steps go
//!
//! # Design Decisions
//! - Fail fast: the first failing step ends the sequence, `run` reports it
//! - `--help` and `--version` print and end the sequence without an error
//! - Steps run synchronously, in order, before any task is spawned

use std::ffi::OsString;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use notify::RecommendedWatcher;

use crate::app::{ENV_CONFIG_PATH, ENV_LOG_PATH, ENV_TRACE_HEADER_NAME};
use crate::config::loader::load_source;
use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigSource, ConfigStore, EgoFlags};
use crate::error::Result;
use crate::lifecycle::AppContext;
use crate::observability::{logging, metrics, tracing as trace};
use crate::security::RateLimiter;

/// Mutable state threaded through the init steps.
pub(crate) struct Bootstrap {
    pub(crate) args: Vec<OsString>,
    pub(crate) disable_banner: bool,
    pub(crate) ctx: AppContext,
    pub(crate) watcher: Option<RecommendedWatcher>,
}

type Step = fn(&mut Bootstrap) -> Result<ControlFlow<()>>;

const STEPS: [(&str, Step); 7] = [
    ("parse_flags", parse_flags),
    ("print_banner", print_banner),
    ("load_config", load_config),
    ("init_logger", init_logger),
    ("init_metrics", init_metrics),
    ("init_tracer", init_tracer),
    ("init_limiter", init_limiter),
];

/// Run every step in order. `Break` means the application should exit
/// without running.
pub(crate) fn run_steps(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    for (name, step) in STEPS {
        if step(boot)?.is_break() {
            tracing::debug!(target: "ego", step = name, "Init sequence ended early");
            return Ok(ControlFlow::Break(()));
        }
    }
    Ok(ControlFlow::Continue(()))
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_flags(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    let flags = match EgoFlags::parse_args(&boot.args) {
        Ok(flags) => flags,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(ControlFlow::Break(()));
        }
        Err(e) => return Err(e.into()),
    };

    if flags.version {
        let app = boot.ctx.app();
        println!("{} {} (ego {})", app.name, app.version, env!("CARGO_PKG_VERSION"));
        return Ok(ControlFlow::Break(()));
    }

    boot.ctx.flags = Arc::new(flags);
    Ok(ControlFlow::Continue(()))
}

fn print_banner(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    if !boot.disable_banner {
        let app = boot.ctx.app();
        println!(
            "ego {} :: app={} mode={} host={} pid={}",
            env!("CARGO_PKG_VERSION"),
            app.name,
            app.mode,
            app.host,
            app.pid
        );
    }
    Ok(ControlFlow::Continue(()))
}

fn load_config(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    let env_path = env(ENV_CONFIG_PATH);
    let source = ConfigSource::resolve(boot.ctx.flags.config.as_deref(), env_path.as_deref());
    let snapshot = load_source(&source)?;

    Arc::make_mut(&mut boot.ctx.app).apply_config(&snapshot.config, env);

    let found = snapshot.source.is_some();
    boot.ctx.config = ConfigStore::new(snapshot);

    if boot.ctx.flags.watch {
        if found {
            let watcher = ConfigWatcher::new(source.path(), boot.ctx.config.clone()).run()?;
            boot.watcher = Some(watcher);
        } else {
            eprintln!(
                "ego: --watch ignored, {} does not exist",
                source.path().display()
            );
        }
    }
    Ok(ControlFlow::Continue(()))
}

fn init_logger(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    let config = boot.ctx.config.config();
    let log_path = env(ENV_LOG_PATH).map(PathBuf::from);
    logging::init(&config.logger, boot.ctx.app.debug, log_path.as_deref())?;

    let app = boot.ctx.app();
    let source = boot.ctx.config.load().source.clone();
    tracing::info!(
        target: "ego",
        app = %app.name,
        mode = %app.mode,
        instance = %app.instance,
        config = ?source,
        "Application initializing"
    );
    Ok(ControlFlow::Continue(()))
}

fn init_metrics(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    if boot.ctx.config.config().metrics.enabled {
        boot.ctx.metrics = Some(metrics::init_recorder()?);
    } else {
        tracing::info!(target: "ego", "Metrics disabled");
    }
    Ok(ControlFlow::Continue(()))
}

fn init_tracer(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    let config = boot.ctx.config.config();
    boot.ctx.trace_header = trace::trace_header(&config.trace, env(ENV_TRACE_HEADER_NAME))?;
    tracing::debug!(target: "ego", header = %boot.ctx.trace_header, "Trace header resolved");
    Ok(ControlFlow::Continue(()))
}

fn init_limiter(boot: &mut Bootstrap) -> Result<ControlFlow<()>> {
    let config = boot.ctx.config.config();
    boot.ctx.limiter = RateLimiter::from_config(&config.limiter).map(Arc::new);
    if boot.ctx.limiter.is_some() {
        tracing::info!(
            target: "ego",
            requests_per_second = config.limiter.requests_per_second,
            burst_size = config.limiter.burst_size,
            "Rate limiter enabled"
        );
    }
    Ok(ControlFlow::Continue(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn boot(args: &[&str]) -> Bootstrap {
        Bootstrap {
            args: args.iter().map(OsString::from).collect(),
            disable_banner: true,
            ctx: AppContext::default(),
            watcher: None,
        }
    }

    #[test]
    fn version_ends_the_sequence() {
        let mut boot = boot(&["app", "--version"]);
        assert!(run_steps(&mut boot).unwrap().is_break());
    }

    #[test]
    fn missing_explicit_config_fails() {
        let mut boot = boot(&["app", "--config", "/nonexistent/ego.toml"]);
        assert!(run_steps(&mut boot).is_err());
    }

    #[test]
    fn config_feeds_the_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[limiter]\nenabled = true\n[trace]\nheader_name = \"x-req\"\n[metrics]\nenabled = false\n[server.http]\nport = 1"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut boot = boot(&["app", "--config", &path]);
        assert!(run_steps(&mut boot).unwrap().is_continue());

        assert!(boot.ctx.limiter().is_some());
        assert!(boot.ctx.metrics().is_none());
        assert_eq!(boot.ctx.config().load().get("server.http.port").unwrap().as_integer(), Some(1));
        if std::env::var(ENV_TRACE_HEADER_NAME).is_err() {
            assert_eq!(boot.ctx.trace_header(), "x-req");
        }
    }
}
