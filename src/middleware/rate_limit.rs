//! Login rate limiting middleware.
//!
//! Per-IP throttling of the login endpoint behind a pluggable collaborator
//! trait. The default implementation is an in-memory sliding window; a
//! shared/distributed counter can be swapped in at the same seam when the
//! service scales horizontally. The per-account lockout in the auth core is
//! the authoritative brute-force defense; this throttle only blunts
//! high-volume guessing from a single address.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Burst allowance (extra requests above limit before hard reject).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
            burst: 10,
        }
    }
}

/// Decision returned by a limiter for one request.
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

/// Pluggable login-throttle collaborator.
pub trait LoginRateLimiter: Send + Sync {
    fn check(&self, ip: IpAddr) -> RateLimitDecision;

    /// Drop stale bookkeeping (call from a background task).
    fn cleanup(&self);
}

/// In-memory sliding-window limiter tracking requests per IP.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<IpAddr, WindowEntry>>,
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl LoginRateLimiter for SlidingWindowLimiter {
    fn check(&self, ip: IpAddr) -> RateLimitDecision {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        let limit = self.config.max_requests + self.config.burst;
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitDecision::Exceeded {
                retry_after: reset_at.duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitDecision::BurstUsed { remaining }
        } else {
            RateLimitDecision::Allowed { remaining }
        }
    }

    fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;

        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

/// Rate limiting middleware function.
///
/// When no peer address is available (e.g. in-process tests), requests are
/// attributed to the unspecified address.
pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<Arc<dyn LoginRateLimiter>>,
    addr: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr
        .map(|ConnectInfo(a)| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(ip) {
        RateLimitDecision::Allowed { .. } | RateLimitDecision::BurstUsed { .. } => {
            next.run(request).await
        }
        RateLimitDecision::Exceeded { retry_after } => {
            warn!(
                ip = %ip,
                retry_after_secs = retry_after.as_secs(),
                "Login rate limit exceeded"
            );

            let body = serde_json::json!({
                "success": false,
                "message": "Too many login attempts. Please slow down.",
                "code": "RATE_LIMITED",
                "retry_after_seconds": retry_after.as_secs(),
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_allows_under_limit() {
        let config = RateLimitConfig {
            max_requests: 10,
            window: Duration::from_secs(60),
            burst: 5,
        };
        let limiter = SlidingWindowLimiter::new(config);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..10 {
            match limiter.check(ip) {
                RateLimitDecision::Allowed { .. } => {}
                _ => panic!("Should be allowed"),
            }
        }
    }

    #[test]
    fn test_rate_limit_allows_burst_then_rejects() {
        let config = RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(60),
            burst: 3,
        };
        let limiter = SlidingWindowLimiter::new(config);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        // First 5 should be normal allowed
        for _ in 0..5 {
            match limiter.check(ip) {
                RateLimitDecision::Allowed { .. } => {}
                _ => panic!("Should be allowed"),
            }
        }

        // Next 3 should use burst
        for _ in 0..3 {
            match limiter.check(ip) {
                RateLimitDecision::BurstUsed { .. } => {}
                _ => panic!("Should be burst"),
            }
        }

        // 9th should be exceeded
        match limiter.check(ip) {
            RateLimitDecision::Exceeded { .. } => {}
            _ => panic!("Should be exceeded"),
        }
    }

    #[test]
    fn test_separate_ips_have_separate_windows() {
        let config = RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            burst: 0,
        };
        let limiter = SlidingWindowLimiter::new(config);

        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(matches!(limiter.check(a), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check(a), RateLimitDecision::Exceeded { .. }));
        assert!(matches!(limiter.check(b), RateLimitDecision::Allowed { .. }));
    }
}
