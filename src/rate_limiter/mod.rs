/*!
 * # Rate Limiting Module
 *
 * Fixed-window request limits per route class (carrier webhooks, manual
 * tracking triggers, bulk admin updates). Counters live in process memory,
 * keyed by the connecting peer address. The first `X-Forwarded-For` hop is
 * used instead only when the limiter trusts a fronting proxy. Requests with
 * neither share the `global` bucket.
 *
 * ## Usage
 *
 * ```ignore
 * let limiter = RateLimiter::per_minute("webhook", 30);
 * let routes = Router::new()
 *     .route("/webhooks/shipping/:provider", post(handler))
 *     .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));
 * ```
 */
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use metrics::counter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::errors::ServiceError;

pub const GLOBAL_KEY: &str = "global";

fn num_to_header_value<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn time_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    /// Key on `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_duration: Duration::from_secs(60),
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: Duration,
}

impl RateLimitResult {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", num_to_header_value(self.limit));
        headers.insert("x-ratelimit-remaining", num_to_header_value(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            num_to_header_value(self.reset_time.as_secs()),
        );
    }
}

/// One route class with its own counters
#[derive(Clone)]
pub struct RateLimiter {
    class: &'static str,
    entries: Arc<DashMap<String, RateLimitEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(class: &'static str, config: RateLimitConfig) -> Self {
        Self {
            class,
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn per_minute(class: &'static str, limit: u32) -> Self {
        Self::new(
            class,
            RateLimitConfig {
                requests_per_window: limit,
                ..RateLimitConfig::default()
            },
        )
    }

    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.config.trust_forwarded_for = trust;
        self
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn check_rate_limit(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let limit = self.config.requests_per_window;
        let window = self.config.window_duration;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::new(now));

        if now.duration_since(entry.window_start) >= window {
            *entry = RateLimitEntry::new(now);
        }

        let allowed = entry.count < limit;
        if allowed {
            entry.count += 1;
        }

        RateLimitResult {
            allowed,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_time: entry.time_until_reset(now, window),
        }
    }

    /// Drops counters whose window has passed
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.config.window_duration;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Client key. The forwarded header is client-controlled, so it is only
/// read when a trusted proxy sets it.
pub fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    let forwarded = if trust_forwarded_for {
        forwarded_for(headers)
    } else {
        None
    };
    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| GLOBAL_KEY.to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, limiter.config.trust_forwarded_for);
    let result = limiter.check_rate_limit(&key);

    if !result.allowed {
        warn!(class = limiter.class(), key = %key, "rate limit exceeded");
        counter!("http.rate_limited", 1, "class" => limiter.class());
        let mut response = ServiceError::RateLimitExceeded.into_response();
        result.apply_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    result.apply_headers(response.headers_mut());
    response
}

/// Periodically evicts stale counters
pub fn start_cleanup_task(limiters: Vec<RateLimiter>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for limiter in &limiters {
                limiter.cleanup_expired();
            }
        }
    });
}
