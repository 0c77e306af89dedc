use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::AppState;

const MAX_REQUESTS: u32 = 5;
const WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window request counter keyed by client IP + path. In-memory, so it
/// only covers a single instance; a multi-instance deployment would need a
/// shared store behind the same interface.
#[derive(Clone, Default)]
pub struct RateLimitState {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

struct Bucket {
    hits: u32,
    opened: Instant,
}

impl Bucket {
    fn fresh(now: Instant) -> Self {
        Self { hits: 0, opened: now }
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit for `key`. Returns how many requests remain in the current
    /// window, or the time until the window resets when the key is over limit.
    pub async fn check(&self, key: &str) -> Result<u32, Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::fresh(now));

        if now.duration_since(bucket.opened) > WINDOW {
            *bucket = Bucket::fresh(now);
        }

        if bucket.hits >= MAX_REQUESTS {
            return Err(WINDOW.saturating_sub(now.duration_since(bucket.opened)));
        }

        bucket.hits += 1;
        Ok(MAX_REQUESTS - bucket.hits)
    }

    /// Drop buckets that have been idle past the retention window; run from a
    /// background task so the map does not grow with every IP ever seen.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, b| now.duration_since(b.opened) < WINDOW * 2);
    }
}

/// Middleware guarding the auth endpoints. Keyed by IP + path so exhausting
/// /api/auth/login does not also lock out /api/auth/signup.
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = format!("{}:{}", addr.ip(), req.uri().path());

    match state.rate_limiter.check(&key).await {
        Ok(remaining) => {
            tracing::debug!(key = %key, remaining, "Rate limit check passed");
            Ok(next.run(req).await)
        }
        Err(retry_after) => {
            tracing::warn!(
                key = %key,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(AppError::RateLimited)
        }
    }
}
