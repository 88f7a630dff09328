//! Request rate limiting.
//!
//! # Responsibilities
//! - Count requests per client address
//! - Reject excess requests with 429
//!
//! # Design Decisions
//! - With a cache available, a fixed-window counter is kept in the cache so
//!   every process behind the same backend shares one budget
//! - Without one, per-client token buckets live in process memory
//! - Cache failures let the request through and are logged

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::cache::{CacheError, CacheHandle};
use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
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

/// Rate limiter state shared by every request of an entry.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    cache: CacheHandle,
    buckets: DashMap<IpAddr, TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, cache: CacheHandle) -> Self {
        Self {
            limit: config.requests_per_window,
            window: Duration::from_secs(config.window_secs),
            cache,
            buckets: DashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a request from `client` may proceed.
    pub async fn check(&self, client: IpAddr) -> bool {
        match &self.cache {
            CacheHandle::Disabled => self.check_local(client),
            cache => match self.check_shared(cache, client).await {
                Ok(allowed) => allowed,
                Err(err) => {
                    tracing::warn!(client = %client, error = %err, "Rate limit counter unavailable");
                    true
                }
            },
        }
    }

    fn check_local(&self, client: IpAddr) -> bool {
        let capacity = self.limit as f64;
        let refill = capacity / self.window.as_secs_f64().max(1.0);
        self.buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(capacity))
            .try_acquire(capacity, refill)
    }

    async fn check_shared(&self, cache: &CacheHandle, client: IpAddr) -> Result<bool, CacheError> {
        let window_secs = self.window.as_secs().max(1);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let key = format!("ratelimit:{client}:{}", now / window_secs);

        let count = match cache {
            CacheHandle::Distributed(redis) => redis.incr_with_expiry(&key, self.window).await?,
            other => {
                let current = other
                    .get(&key)
                    .await?
                    .and_then(|raw| String::from_utf8(raw).ok())
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + 1;
                other
                    .set(&key, next.to_string().as_bytes(), Some(self.window))
                    .await?;
                next
            }
        };
        Ok(count <= i64::from(self.limit))
    }
}

/// Middleware rejecting clients over their budget.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(client) = client else {
        return next.run(request).await;
    };

    if limiter.check(client).await {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited();
        let mut response = (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
        if let Ok(value) = HeaderValue::from_str(&limiter.window.as_secs().to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
