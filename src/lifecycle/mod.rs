//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs, on EgoBuilder::build):
//!     Flags → Banner → Config → Logger → Metrics → Tracer → Limiter
//!
//! Run (ego.rs):
//!     Invokers → Jobs mode, or Servers + OrderServers + Crons on the Cycle
//!     → wait for the first error or for the stop to finish
//!
//! Stop (ego.rs, from signals.rs or Ego::stop):
//!     Before-stop hooks → stop servers (graceful, bounded) → stop crons
//!     → Cycle done → root Shutdown → close
//!     → after-stop hooks → flush logs
//! ```
//!
//! # Design Decisions
//! - Every long-running task is tracked by one Cycle (cycle.rs)
//! - The stop sequence runs once; a second signal exits the process
//! - Graceful stops are bounded per server and fall back to a forced stop

pub mod context;
pub mod cycle;
pub mod ego;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use context::AppContext;
pub use cycle::Cycle;
pub use ego::{Ego, EgoBuilder, State};
pub use shutdown::Shutdown;
pub use signals::Signal;
