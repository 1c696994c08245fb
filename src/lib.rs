//! Ego: an application framework for long-running services.
//!
//! An [`Ego`] owns the application's servers, ordered servers, crons and
//! jobs, runs them on one task group, and stops them gracefully on a
//! signal. Components get their configuration, metrics and identity from
//! an explicit [`AppContext`].

pub mod app;
pub mod config;
pub mod cron;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod server;

pub use error::{BoxError, Error, Result};
pub use lifecycle::{AppContext, Ego, EgoBuilder, Shutdown, Signal};
