//! Request tracing support.
//!
//! # Responsibilities
//! - Resolve the trace header name (`[trace] header_name`, `EGO_TRACE_HEADER_NAME`)
//! - Assign a trace id to requests that arrive without one
//! - Echo the trace id on responses
//!
//! # Design Decisions
//! - UUID v4 ids via tower-http's request-id layers
//! - One `TraceLayer` span per request; the id is a header, not a span field

use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::config::schema::TraceConfig;
use crate::config::validation::ValidationError;
use crate::config::ConfigError;
use crate::error::Error;

/// Pick the trace header: the environment wins over the config file.
pub fn trace_header(config: &TraceConfig, env: Option<String>) -> Result<HeaderName, Error> {
    let (field, name) = match env.filter(|value| !value.is_empty()) {
        Some(name) => ("EGO_TRACE_HEADER_NAME", name),
        None => ("trace.header_name", config.header_name.clone()),
    };

    HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
        Error::Config(ConfigError::Validation(vec![ValidationError {
            field,
            reason: format!("`{name}` is not a valid header name"),
        }]))
    })
}

/// Layers that set (when missing) and propagate the trace id header.
pub fn request_id_layers(
    header: HeaderName,
) -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    (
        SetRequestIdLayer::new(header.clone(), MakeRequestUuid),
        PropagateRequestIdLayer::new(header),
    )
}

/// Trace id carried by `headers`, if any.
pub fn trace_id<'a>(headers: &'a HeaderMap, header: &HeaderName) -> Option<&'a str> {
    headers.get(header).and_then(|value| value.to_str().ok())
}
