//! Per-token fixed-window rate limiting for the ping endpoint.
//!
//! State is per-process and in-memory; it is a protective backstop against
//! misbehaving job runners, not an accounting mechanism, so losing counters
//! on restart is acceptable.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::time::Duration;

pub const DEFAULT_LIMIT: u32 = 60;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Above this many tracked keys, expired windows are swept opportunistically.
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

struct Window {
    count: u32,
    reset_at_ms: i64,
}

#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;

        if self.windows.len() > MAX_TRACKED_KEYS {
            self.windows
                .retain(|_, w| w.reset_at_ms >= now_ms - window_ms);
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at_ms: now_ms + window_ms,
        });
        if entry.reset_at_ms < now_ms {
            entry.count = 0;
            entry.reset_at_ms = now_ms + window_ms;
        }
        entry.count += 1;

        RateLimitResult {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: Utc
                .timestamp_millis_opt(entry.reset_at_ms)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_opens_a_window() {
        let limiter = RateLimiter::new();
        let result = limiter.check("tok", DEFAULT_LIMIT, DEFAULT_WINDOW);
        assert!(result.allowed);
        assert_eq!(result.remaining, DEFAULT_LIMIT - 1);
        assert!(result.reset_at > Utc::now());
    }

    #[test]
    fn sixty_first_request_in_a_window_is_rejected() {
        let limiter = RateLimiter::new();
        for i in 0..60 {
            let result = limiter.check("tok", 60, DEFAULT_WINDOW);
            assert!(result.allowed, "request {} should pass", i + 1);
        }
        let result = limiter.check("tok", 60, DEFAULT_WINDOW);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
    }

    #[test]
    fn keys_are_counted_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..60 {
            limiter.check("a", 60, DEFAULT_WINDOW);
        }
        assert!(!limiter.check("a", 60, DEFAULT_WINDOW).allowed);
        assert!(limiter.check("b", 60, DEFAULT_WINDOW).allowed);
    }

    #[test]
    fn expired_window_resets_the_count() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(10);
        assert!(limiter.check("tok", 1, window).allowed);
        assert!(!limiter.check("tok", 1, window).allowed);

        std::thread::sleep(Duration::from_millis(25));
        let result = limiter.check("tok", 1, window);
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);
    }
}
