//! DNS service discovery.
//!
//! # Data Flow
//! ```text
//! DnsResolver::watch_services("dns:///foo.bar.com:50051")
//!     → parse_target (literal IP? → one static address, no loop)
//!     → initial resolution (A/AAAA + optional SRV), errors returned
//!     → background loop: ticker (120s) | resolve_now (collapsing)
//!     → fresh Endpoints pushed on the watch channel each time
//! ```
//!
//! # Design Decisions
//! - Only timeout/temporary lookup errors count as failures; "no such host"
//!   resolves to an empty set
//! - Periodic failures are logged and the loop keeps the last good state
//! - Each publication is an owned value; nothing is shared with consumers

pub mod dns;
pub mod lookup;

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use url::Url;

pub use dns::{DnsConfig, DnsResolver, EndpointWatch};
pub use lookup::{Lookup, LookupError, SrvRecord, SystemLookup};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("invalid target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to resolve {target}: {source}")]
    Lookup {
        target: String,
        #[source]
        source: LookupError,
    },
}

/// A grpclb balancer found through SRV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balancer {
    pub addr: SocketAddr,
    pub server_name: String,
}

/// One resolution result for a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub target: String,
    pub addresses: Vec<SocketAddr>,
    pub balancers: Vec<Balancer>,
}

impl Endpoints {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.balancers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len() + self.balancers.len()
    }
}

/// A parsed resolver target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Set when the host is a literal IP address.
    pub ip: Option<IpAddr>,
}

/// Parse `host`, `host:port`, `[v6]:port` or `dns:///host:port`.
pub fn parse_target(target: &str, default_port: u16) -> Result<Target, ResolveError> {
    let invalid = |reason: &str| ResolveError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    let endpoint = match target.strip_prefix("dns:") {
        Some(rest) => {
            let url = Url::parse(&format!("dns:{rest}")).map_err(|e| invalid(&e.to_string()))?;
            url.path().trim_start_matches('/').to_string()
        }
        None => target.to_string(),
    };
    if endpoint.is_empty() {
        return Err(invalid("missing host"));
    }

    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return Ok(Target {
            host: addr.ip().to_string(),
            port: addr.port(),
            ip: Some(addr.ip()),
        });
    }
    let bare = endpoint.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(Target {
            host: ip.to_string(),
            port: default_port,
            ip: Some(ip),
        });
    }

    let url = Url::parse(&format!("dns://{endpoint}")).map_err(|e| invalid(&e.to_string()))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    if url.path().len() > 1 {
        return Err(invalid("unexpected path"));
    }

    Ok(Target {
        host: host.to_string(),
        port: url.port().unwrap_or(default_port),
        ip: None,
    })
}
