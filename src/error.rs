//! Crate-wide error type.
//!
//! Components hand errors back as [`BoxError`] so applications can plug in
//! any error type; the orchestrator wraps those as [`Error::Component`].

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::resolver::ResolveError;

/// Boxed error returned by servers, jobs, crons and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid flags: {0}")]
    Flags(#[from] clap::Error),

    #[error("failed to initialize logger: {0}")]
    Logger(String),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("order server {name} not healthy after {timeout:?}")]
    Unhealthy { name: String, timeout: Duration },

    #[error("task panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error reported by an application component. Displays as the
    /// component's own message.
    #[error("{0}")]
    Component(BoxError),
}

impl Error {
    pub fn component(err: impl Into<BoxError>) -> Self {
        Error::Component(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_error_displays_inner_message() {
        let err = Error::component("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
