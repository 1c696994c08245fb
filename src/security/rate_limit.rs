//! Per-client rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;

use crate::config::LimiterConfig;
use crate::observability::metrics;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// A bucket idle this long is full again and can be forgotten.
    fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        now.duration_since(self.last_update) >= idle
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct Buckets {
    by_client: HashMap<String, TokenBucket>,
    last_prune: Instant,
}

/// Token-bucket limiter keyed by client.
///
/// Buckets of clients idle long enough to have refilled are evicted, so
/// the map only holds recently active clients.
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    rps: f64,
    burst: f64,
    /// `None` when buckets never refill (zero rate).
    idle_after: Option<Duration>,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        let idle_after = (requests_per_second > 0).then(|| {
            Duration::from_secs_f64(f64::from(burst_size) / f64::from(requests_per_second))
                .max(Duration::from_millis(1))
        });
        Self {
            buckets: Mutex::new(Buckets {
                by_client: HashMap::new(),
                last_prune: Instant::now(),
            }),
            rps: f64::from(requests_per_second),
            burst: f64::from(burst_size),
            idle_after,
        }
    }

    /// `None` when limiting is disabled.
    pub fn from_config(config: &LimiterConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.requests_per_second, config.burst_size))
    }

    /// Take one token for `key`; `false` means the request must be refused.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();

        if let Some(idle) = self.idle_after {
            if now.duration_since(buckets.last_prune) >= idle {
                buckets.by_client.retain(|_, bucket| !bucket.is_idle(now, idle));
                buckets.last_prune = now;
            }
        }

        let bucket = buckets
            .by_client
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));

        bucket.try_acquire(self.burst, self.rps)
    }

    /// Number of clients with a live bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().by_client.len()
    }
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct LimiterState {
    pub limiter: Arc<RateLimiter>,
    pub server: Arc<str>,
}

/// Middleware refusing requests over the per-IP budget with 429.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<LimiterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = addr.ip().to_string();

    if state.limiter.check(&key) {
        next.run(request).await
    } else {
        tracing::warn!(target: "ego", server = %state.server, client = %key, "Rate limit exceeded");
        metrics::record_limiter_rejected(&state.server);
        let mut response = Response::new(Body::from("Rate limit exceeded"));
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject() {
        let limiter = RateLimiter::new(1, 2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Buckets are per client.
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn disabled_config_builds_nothing() {
        assert!(RateLimiter::from_config(&LimiterConfig::default()).is_none());
    }

    #[test]
    fn idle_clients_are_evicted() {
        // A bucket refills in burst / rps = 10ms.
        let limiter = RateLimiter::new(100, 1);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("10.0.0.3"));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn active_clients_keep_their_bucket() {
        let limiter = RateLimiter::new(1, 2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        // Still limited: an empty bucket is not idle.
        assert!(!limiter.check("10.0.0.1"));
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
