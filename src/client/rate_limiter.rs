//! Per-model request throttling driven by response headers.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What the backend last told us about one model's quota.
#[derive(Debug, Default)]
struct ModelWindow {
    remaining_requests: Option<u32>,
    remaining_tokens: Option<u32>,
    requests_reset_at: Option<Instant>,
    tokens_reset_at: Option<Instant>,
    consecutive_429s: u32,
    backoff_until: Option<Instant>,
}

impl ModelWindow {
    fn wait_time(&self, now: Instant) -> Duration {
        let pending = |until: Option<Instant>| until.filter(|t| *t > now).map(|t| t - now);

        let mut wait = pending(self.backoff_until).unwrap_or_default();
        if self.remaining_requests == Some(0) {
            wait = wait.max(pending(self.requests_reset_at).unwrap_or_default());
        }
        if self.remaining_tokens == Some(0) {
            wait = wait.max(pending(self.tokens_reset_at).unwrap_or_default());
        }
        wait
    }

    fn record_429(&mut self, now: Instant) {
        self.consecutive_429s += 1;
        let backoff_secs = 2f64.powi(self.consecutive_429s as i32).min(60.0);
        self.backoff_until = Some(now + Duration::from_secs_f64(backoff_secs));
        warn!(
            consecutive_429s = self.consecutive_429s,
            backoff_secs, "Rate limited (429), backing off"
        );
    }

    fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.backoff_until = None;
    }

    fn update_from_headers(&mut self, headers: &reqwest::header::HeaderMap, now: Instant) {
        let header = |key: &str| headers.get(key).and_then(|v| v.to_str().ok());
        let seconds = |key: &str| {
            header(key)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(|s| now + Duration::from_secs_f64(s))
        };

        if let Some(v) = header("x-ratelimit-remaining-requests") {
            self.remaining_requests = v.parse().ok();
        }
        if let Some(v) = header("x-ratelimit-remaining-tokens") {
            self.remaining_tokens = v.parse().ok();
        }
        if let Some(at) = seconds("x-ratelimit-reset-requests") {
            self.requests_reset_at = Some(at);
        }
        if let Some(at) = seconds("x-ratelimit-reset-tokens") {
            self.tokens_reset_at = Some(at);
        }
    }
}

/// Shared limiter keyed by model id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, ModelWindow>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until `model` may be called again. Returns the time waited.
    pub async fn wait_if_needed(&self, model: &str) -> Duration {
        let wait = self
            .windows
            .entry(model.to_string())
            .or_default()
            .wait_time(Instant::now());

        if !wait.is_zero() {
            debug!(model, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record a response for `model`.
    pub fn record_response(&self, model: &str, status: u16, headers: &reqwest::header::HeaderMap) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut window = self.windows.entry(model.to_string()).or_default();
        window.update_from_headers(headers, now);

        if status == 429 {
            self.total_429s.fetch_add(1, Ordering::Relaxed);
            window.record_429(now);
        } else if status < 400 {
            window.record_success();
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_429s: self.total_429s.load(Ordering::Relaxed),
            total_wait: Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait: Duration,
}
