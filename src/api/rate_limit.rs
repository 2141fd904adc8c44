//! Per-client token bucket admission control.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use moka::future::Cache;
use serde_json::json;

use crate::config::RateLimitSettings;

/// Rejection returned when a client has no token left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited;

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Rate limit exceeded" })),
        )
            .into_response()
    }
}

/// Classic token bucket: holds at most `capacity` tokens and regains
/// `refill_per_sec` tokens per second of elapsed time.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    updated_at: Instant,
}

impl TokenBucket {
    /// A bucket that starts full.
    pub fn full(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_per_sec,
            updated_at: now,
        }
    }

    /// Takes one token if available. Never waits.
    pub fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.updated_at);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.refill_per_sec;
        self.tokens = refilled.min(self.capacity);
        self.updated_at = self.updated_at.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets keyed by client identity.
///
/// Buckets are created full on first sight. Lookup-or-create is atomic per
/// key, and each bucket's read-modify-write happens under its own mutex, so
/// concurrent requests from one client can never both spend the same token.
///
/// Idle buckets are evicted after `idle_secs`, which is clamped to at least
/// the time an empty bucket needs to refill. An evicted bucket would have been
/// full again anyway, so eviction is invisible to clients.
pub struct RateLimiter {
    buckets: Cache<String, Arc<Mutex<TokenBucket>>>,
    requests_per_second: f64,
    burst: u32,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let refill_secs = f64::from(settings.burst) / settings.requests_per_second;
        let idle = Duration::from_secs(settings.idle_secs)
            .max(Duration::from_secs_f64(refill_secs.ceil().max(1.0)));

        let buckets = Cache::builder()
            .max_capacity(settings.max_clients)
            .time_to_idle(idle)
            .build();

        Self {
            buckets,
            requests_per_second: settings.requests_per_second,
            burst: settings.burst,
        }
    }

    pub async fn check(&self, client: &str) -> Result<(), RateLimited> {
        self.check_at(client, Instant::now()).await
    }

    pub async fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimited> {
        let bucket = self
            .buckets
            .get_with_by_ref(client, async {
                Arc::new(Mutex::new(TokenBucket::full(
                    self.burst,
                    self.requests_per_second,
                    now,
                )))
            })
            .await;

        // A panic while holding the lock cannot leave the bucket half-updated
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        if bucket.try_take(now) {
            Ok(())
        } else {
            Err(RateLimited)
        }
    }
}

/// Identity a request is rate limited under: the peer IP, or the first
/// `X-Forwarded-For` hop when running behind a trusted proxy.
pub fn client_identity(
    headers: &HeaderMap,
    peer: SocketAddr,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}
