//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber from `[logger]`
//! - Route output to stdout or to the file named by `EGO_LOG_PATH`
//! - Flush writers during the final stop phase
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level; `EGO_DEBUG` forces debug
//! - JSON format for production, pretty format for development
//! - Installing twice is not an error: the first subscriber stays

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggerConfig;
use crate::error::Error;

pub fn init(config: &LoggerConfig, debug: bool, log_path: Option<&Path>) -> Result<(), Error> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let writer = match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Logger(format!("{}: {e}", path.display())))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let installed = match config.format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_writer(writer).try_init(),
    };

    if installed.is_err() {
        tracing::debug!(target: "ego", "Global subscriber already installed, keeping it");
    }
    Ok(())
}

/// Flush process-level log writers.
pub fn flush() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
