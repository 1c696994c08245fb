//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! --config / EGO_CONFIG_PATH / config/local.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → store.rs (ConfigSnapshot behind ArcSwap)
//!     → components read their sections via unmarshal_key
//!
//! With --watch:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap in the store, revision bumped
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A failed reload keeps the current snapshot

pub mod flags;
pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use flags::EgoFlags;
pub use loader::{ConfigError, ConfigSource};
pub use schema::{EgoConfig, LimiterConfig, LoggerConfig};
pub use store::{ConfigSnapshot, ConfigStore};
