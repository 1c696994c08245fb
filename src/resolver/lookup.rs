//! Name lookups behind a trait so tests can script DNS answers.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError as DnsError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup of {name} timed out")]
    Timeout { name: String },

    #[error("temporary failure looking up {name}: {reason}")]
    Temporary { name: String, reason: String },

    #[error("no such host: {name}")]
    NotFound { name: String },
}

impl LookupError {
    /// Timeouts and temporary failures; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Timeout { .. } | LookupError::Temporary { .. })
    }

    fn from_io(name: &str, err: io::Error) -> Self {
        let name = name.to_string();
        match err.kind() {
            io::ErrorKind::TimedOut => LookupError::Timeout { name },
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => LookupError::Temporary {
                name,
                reason: err.to_string(),
            },
            // getaddrinfo reports EAI_AGAIN as an uncategorized error.
            _ if err.to_string().to_ascii_lowercase().contains("temporary failure") => {
                LookupError::Temporary {
                    name,
                    reason: err.to_string(),
                }
            }
            _ => LookupError::NotFound { name },
        }
    }

    /// NXDOMAIN and empty answers are final. SERVFAIL, refusals and
    /// transport errors are worth retrying.
    fn from_dns(name: &str, err: &DnsError) -> Self {
        let name = name.to_string();
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. }
                if matches!(*response_code, ResponseCode::NoError | ResponseCode::NXDomain) =>
            {
                LookupError::NotFound { name }
            }
            ResolveErrorKind::Timeout => LookupError::Timeout { name },
            _ => LookupError::Temporary {
                name,
                reason: err.to_string(),
            },
        }
    }
}

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

#[async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, LookupError>;

    /// Look up `_service._proto.name`.
    async fn lookup_srv(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<SrvRecord>, LookupError>;
}

/// The operating system resolver for hosts, plus a DNS client for SRV.
///
/// The DNS client reads the system resolver configuration; when there is
/// none it falls back to the hickory defaults.
#[derive(Clone)]
pub struct SystemLookup {
    timeout: Duration,
    dns: TokioAsyncResolver,
}

impl fmt::Debug for SystemLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemLookup")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SystemLookup {
    pub fn new(timeout: Duration) -> Self {
        let (config, opts) = match hickory_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                tracing::warn!(target: "ego", error = %e, "No system DNS configuration, using defaults for SRV lookups");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self::with_config(config, opts, timeout)
    }

    /// Send SRV queries to the given name servers only.
    pub fn with_name_servers(servers: &[SocketAddr], timeout: Duration) -> Self {
        let mut group = NameServerConfigGroup::new();
        for server in servers {
            group.merge(NameServerConfigGroup::from_ips_clear(
                &[server.ip()],
                server.port(),
                true,
            ));
        }
        let config = ResolverConfig::from_parts(None, Vec::new(), group);
        Self::with_config(config, ResolverOpts::default(), timeout)
    }

    fn with_config(config: ResolverConfig, mut opts: ResolverOpts, timeout: Duration) -> Self {
        opts.timeout = timeout;
        Self {
            timeout,
            dns: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Lookup for SystemLookup {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = tokio::net::lookup_host((host, 0));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(addrs)) => Ok(addrs.map(|addr| addr.ip()).collect()),
            Ok(Err(e)) => Err(LookupError::from_io(host, e)),
            Err(_) => Err(LookupError::Timeout {
                name: host.to_string(),
            }),
        }
    }

    async fn lookup_srv(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<SrvRecord>, LookupError> {
        let query = format!("_{service}._{proto}.{name}");
        let answer = match tokio::time::timeout(self.timeout, self.dns.srv_lookup(query.as_str())).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(LookupError::from_dns(&query, &e)),
            Err(_) => return Err(LookupError::Timeout { name: query }),
        };

        Ok(answer
            .iter()
            .map(|srv| SrvRecord {
                target: srv.target().to_utf8().trim_end_matches('.').to_string(),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            })
            .collect())
    }
}
