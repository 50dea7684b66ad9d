//! Rate limiting.
//!
//! Two layers:
//! - a process-wide GCRA throttle (governor) in front of every route;
//! - per-kind fixed-window limits on ingest, keyed `"<kind>:<client>"`,
//!   held in memory or in Redis when several instances share traffic.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::Serialize;

use crate::AppState;
use crate::config::RateLimitConfig;

/// Outcome of a fixed-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether this request may proceed.
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Whole seconds until the window resets, rounded up.
    pub reset_in: u64,
}

/// A fixed-window counter store.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Count one request against `key` and decide whether it is allowed.
    async fn check(&self, key: &str, limit: &RateLimitConfig) -> RateLimitDecision;

    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;
}

fn ceil_secs(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis().div_ceil(1000)).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window limiter.
///
/// Entries are created on the first request of a key, restarted once their
/// window has passed, and swept opportunistically: each check runs a sweep
/// with probability `cleanup_probability`.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
    cleanup_probability: f64,
}

impl FixedWindowLimiter {
    /// Create a limiter with the given sweep probability.
    #[must_use]
    pub fn new(cleanup_probability: f64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cleanup_probability: cleanup_probability.clamp(0.0, 1.0),
        }
    }

    /// Check `key` at an explicit instant.
    pub fn check_at(&self, key: &str, limit: &RateLimitConfig, now: Instant) -> RateLimitDecision {
        if self.cleanup_probability > 0.0 && rand::random::<f64>() < self.cleanup_probability {
            self.sweep_at(now);
        }

        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                let reset_in = ceil_secs(entry.reset_at - now);
                if entry.count >= limit.max_requests {
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_in,
                    }
                } else {
                    entry.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        remaining: limit.max_requests - entry.count,
                        reset_in,
                    }
                }
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    WindowEntry {
                        count: 1,
                        reset_at: now + limit.window(),
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: limit.max_requests.saturating_sub(1),
                    reset_in: limit.window_ms.div_ceil(1000),
                }
            }
        }
    }

    /// Drop every entry whose window ended before `now`. Returns how many
    /// were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.reset_at);
        before - entries.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl RateLimitBackend for FixedWindowLimiter {
    async fn check(&self, key: &str, limit: &RateLimitConfig) -> RateLimitDecision {
        self.check_at(key, limit, Instant::now())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redis fixed-window limiter: `INCR` on the key, `PEXPIRE` on the first
/// hit of a window, `PTTL` for the reset time.
///
/// Any Redis error falls back to a process-local limiter for that request.
pub struct RedisWindowLimiter {
    conn: redis::aio::ConnectionManager,
    fallback: FixedWindowLimiter,
}

impl std::fmt::Debug for RedisWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowLimiter")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

const REDIS_KEY_PREFIX: &str = "chuef:rate_limit:";

impl RedisWindowLimiter {
    #[must_use]
    pub fn new(conn: redis::aio::ConnectionManager, cleanup_probability: f64) -> Self {
        Self {
            conn,
            fallback: FixedWindowLimiter::new(cleanup_probability),
        }
    }

    async fn check_redis(
        &self,
        key: &str,
        limit: &RateLimitConfig,
    ) -> redis::RedisResult<RateLimitDecision> {
        let mut conn = self.conn.clone();
        let key = format!("{REDIS_KEY_PREFIX}{key}");
        let window_ms = i64::try_from(limit.window_ms).unwrap_or(i64::MAX);

        let count: u64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.pexpire(&key, window_ms).await?;
        }

        let ttl_ms: i64 = conn.pttl(&key).await?;
        if ttl_ms < 0 {
            // Key lost its expiry (e.g. crash between INCR and PEXPIRE).
            let _: () = conn.pexpire(&key, window_ms).await?;
        }

        Ok(Self::decision(count, ttl_ms, limit))
    }

    /// Decision for the `count`th hit of a window whose key has `ttl_ms`
    /// left. A negative TTL means the expiry was just re-applied, so the
    /// full window remains.
    fn decision(count: u64, ttl_ms: i64, limit: &RateLimitConfig) -> RateLimitDecision {
        let ttl_ms = u64::try_from(ttl_ms).unwrap_or(limit.window_ms);
        let max = u64::from(limit.max_requests);
        RateLimitDecision {
            allowed: count <= max,
            remaining: u32::try_from(max.saturating_sub(count)).unwrap_or(0),
            reset_in: ttl_ms.div_ceil(1000),
        }
    }
}

#[async_trait]
impl RateLimitBackend for RedisWindowLimiter {
    async fn check(&self, key: &str, limit: &RateLimitConfig) -> RateLimitDecision {
        match self.check_redis(key, limit).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Redis rate limit failed, using in-memory window"
                );
                self.fallback.check_at(key, limit, Instant::now())
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Identify the client behind a request: the first `X-Forwarded-For` hop,
/// then `X-Real-IP`, then `"localhost"`.
pub fn client_identifier(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        return first.to_string();
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    "localhost".to_string()
}

/// Process-wide throttle type.
pub type GlobalThrottle = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Build the process-wide throttle.
#[must_use]
pub fn global_throttle(requests_per_second: u32, burst: u32) -> Arc<GlobalThrottle> {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_second(rps).allow_burst(burst)))
}

/// Rate limit error response.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitError {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    #[serde(skip)]
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(retry_after));
        response
    }
}

/// Global throttle middleware.
pub async fn global_throttle_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    match state.throttle.check() {
        Ok(()) => Ok(next.run(req).await),
        Err(not_until) => {
            let wait = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
            Err(RateLimitError {
                success: false,
                error: "Server is busy. Please try again shortly.".to_string(),
                code: "RATE_LIMITED",
                retry_after_secs: wait.as_secs().max(1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(window_ms: u64, max_requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            window_ms,
            max_requests,
        }
    }

    #[test]
    fn test_allows_up_to_max_then_denies() {
        let limiter = FixedWindowLimiter::new(0.0);
        let cfg = limit(60_000, 5);
        let now = Instant::now();

        for expected_remaining in (0..5).rev() {
            let decision = limiter.check_at("contact_submission:1.2.3.4", &cfg, now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.reset_in, 60);
        }

        let denied = limiter.check_at("contact_submission:1.2.3.4", &cfg, now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_in, 60);
    }

    #[test]
    fn test_window_expiry_allows_again() {
        let limiter = FixedWindowLimiter::new(0.0);
        let cfg = limit(1_000, 1);
        let start = Instant::now();

        assert!(limiter.check_at("k", &cfg, start).allowed);
        let denied = limiter.check_at("k", &cfg, start + Duration::from_millis(400));
        assert!(!denied.allowed);
        assert_eq!(denied.reset_in, 1);

        // Still inside the window at exactly the reset instant.
        assert!(!limiter.check_at("k", &cfg, start + Duration::from_millis(1_000)).allowed);

        let fresh = limiter.check_at("k", &cfg, start + Duration::from_millis(1_001));
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(0.0);
        let cfg = limit(60_000, 1);
        let now = Instant::now();

        assert!(limiter.check_at("chat_message:a", &cfg, now).allowed);
        assert!(!limiter.check_at("chat_message:a", &cfg, now).allowed);
        assert!(limiter.check_at("chat_message:b", &cfg, now).allowed);
        assert!(limiter.check_at("contact_submission:a", &cfg, now).allowed);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let limiter = FixedWindowLimiter::new(0.0);
        let now = Instant::now();
        limiter.check_at("short", &limit(100, 3), now);
        limiter.check_at("long", &limit(60_000, 3), now);
        assert_eq!(limiter.len(), 2);

        assert_eq!(limiter.sweep_at(now + Duration::from_millis(500)), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_certain_cleanup_sweeps_on_check() {
        let limiter = FixedWindowLimiter::new(1.0);
        let now = Instant::now();
        limiter.check_at("old", &limit(10, 1), now);
        limiter.check_at("new", &limit(60_000, 1), now + Duration::from_millis(50));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_redis_decision_at_and_over_limit() {
        let cfg = limit(60_000, 5);

        let at_max = RedisWindowLimiter::decision(5, 42_100, &cfg);
        assert!(at_max.allowed);
        assert_eq!(at_max.remaining, 0);
        assert_eq!(at_max.reset_in, 43);

        let over = RedisWindowLimiter::decision(6, 42_100, &cfg);
        assert!(!over.allowed);
        assert_eq!(over.remaining, 0);

        let first = RedisWindowLimiter::decision(1, 60_000, &cfg);
        assert!(first.allowed);
        assert_eq!(first.remaining, 4);
        assert_eq!(first.reset_in, 60);
    }

    #[test]
    fn test_redis_decision_missing_ttl_is_full_window() {
        let cfg = limit(60_000, 5);
        for ttl in [-1, -2] {
            let decision = RedisWindowLimiter::decision(3, ttl, &cfg);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2);
            assert_eq!(decision.reset_in, 60);
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL, default redis://127.0.0.1:6379)"]
    async fn test_redis_limiter_against_server() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = redis::Client::open(url).unwrap();
        let conn = redis::aio::ConnectionManager::new(client).await.unwrap();
        let limiter = RedisWindowLimiter::new(conn, 0.0);
        let cfg = limit(60_000, 2);
        let key = format!("test:{}", uuid::Uuid::new_v4());

        assert!(limiter.check(&key, &cfg).await.allowed);
        let second = limiter.check(&key, &cfg).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        assert!((1..=60).contains(&second.reset_in));

        let third = limiter.check(&key, &cfg).await;
        assert!(!third.allowed);
        assert_eq!(limiter.backend_name(), "redis");
    }

    #[test]
    fn test_client_identifier_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers), "localhost");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_identifier(&headers), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(client_identifier(&headers), "203.0.113.7");
    }

    #[test]
    fn test_global_throttle_burst() {
        let throttle = global_throttle(1, 2);
        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_err());
    }

    #[tokio::test]
    async fn test_rate_limit_error_response() {
        let response = RateLimitError {
            success: false,
            error: "busy".to_string(),
            code: "RATE_LIMITED",
            retry_after_secs: 3,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["Retry-After"], "3");
    }
}
