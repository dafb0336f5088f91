use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::{error::AppError, state::AppState};

/// Bucket shared by every client whose address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Denied; the oldest counted request leaves the window after `retry_after`.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Per-client sliding-window limiter.
///
/// Each key holds the instants of its admitted requests inside the trailing
/// window. A check locks only that key's entry, prunes expired instants and
/// counts what is left.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    buckets: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter admitting `max_requests` per `window` for each key.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if a request from `key` is admitted now.
    pub fn allow(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Checks and records a request from `key` now.
    pub fn check(&self, key: &str) -> Admission {
        self.check_at(key, Instant::now())
    }

    /// Checks and records a request from `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Admission {
        let mut stamps = self.buckets.entry(key.to_string()).or_default();
        prune(&mut stamps, now, self.window);

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            return Admission::Allowed;
        }

        let retry_after = stamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);
        Admission::Denied { retry_after }
    }

    /// Drops keys with no request left inside the window.
    ///
    /// # Returns
    ///
    /// The number of keys removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, stamps| {
            prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = stamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

/// Extracts the client IP address from the request extensions.
///
/// # Returns
///
/// The IP address as a string, or [`UNKNOWN_CLIENT`] if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// A middleware that rate limits card reads per client address.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or a `429` carrying `Retry-After` when the budget is spent.
pub async fn rate_limit_read(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = extract_real_ip(&req);

    match state.rate_limiter.check(&client) {
        Admission::Allowed => next.run(req).await,
        Admission::Denied { retry_after } => AppError::RateLimitExceeded {
            client,
            retry_after_secs: retry_after.as_secs_f64().ceil().max(1.0) as u64,
        }
        .into_response(),
    }
}
