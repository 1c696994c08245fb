//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (servers with enable_limiter):
//!     → rate_limit.rs (check per-IP token bucket)
//!     → handler, or 429 Too Many Requests
//! ```
//!
//! # Design Decisions
//! - One limiter per process, built by the `init_limiter` step
//! - Fail closed: an empty bucket rejects

pub mod rate_limit;

pub use rate_limit::RateLimiter;
