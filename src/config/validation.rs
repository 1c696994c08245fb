//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and enumerations
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: EgoConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the store, including on reload

use std::fmt;

use axum::http::HeaderName;

use crate::config::schema::EgoConfig;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const FORMATS: [&str; 2] = ["pretty", "json"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

pub fn validate_config(config: &EgoConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let level = config.logger.level.to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError {
            field: "logger.level",
            reason: format!("unknown level `{}`", config.logger.level),
        });
    }

    if !FORMATS.contains(&config.logger.format.as_str()) {
        errors.push(ValidationError {
            field: "logger.format",
            reason: format!("expected one of {FORMATS:?}, got `{}`", config.logger.format),
        });
    }

    if HeaderName::from_bytes(config.trace.header_name.as_bytes()).is_err() {
        errors.push(ValidationError {
            field: "trace.header_name",
            reason: format!("`{}` is not a valid header name", config.trace.header_name),
        });
    }

    if config.limiter.enabled {
        if config.limiter.requests_per_second == 0 {
            errors.push(ValidationError {
                field: "limiter.requests_per_second",
                reason: "must be greater than zero".to_string(),
            });
        }
        if config.limiter.burst_size == 0 {
            errors.push(ValidationError {
                field: "limiter.burst_size",
                reason: "must be greater than zero".to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&EgoConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = EgoConfig::default();
        config.logger.level = "loud".into();
        config.logger.format = "xml".into();
        config.limiter.enabled = true;
        config.limiter.requests_per_second = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            ["logger.level", "logger.format", "limiter.requests_per_second"]
        );
    }
}
