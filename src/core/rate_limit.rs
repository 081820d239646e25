//! Per-key request limiter with fixed windows

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Result of a [`RateLimiter::consume`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the current window ends
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    resets_at: Instant,
}

/// Counts requests per key and refuses them once `limit` is reached within
/// one window. A window opens with the first request for a key.
#[derive(Debug)]
pub struct RateLimiter {
    counters: RwLock<HashMap<String, WindowCounter>>,
    limit: u32,
    window: Duration,
    // sweep expired keys every this many calls
    sweep_every: u32,
    calls: AtomicU32,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            limit,
            window,
            sweep_every: 1024,
            calls: AtomicU32::new(0),
        }
    }

    /// Maximum requests per window
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request for `key` and decide whether it is allowed
    pub fn consume(&self, key: &str) -> RateLimitDecision {
        self.consume_at(key, Instant::now())
    }

    /// Same as [`consume`](Self::consume) with an explicit clock reading
    pub fn consume_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        self.maybe_sweep(now);

        let mut counters = match self.counters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(counter) = counters.get_mut(key).filter(|c| now < c.resets_at) {
            let reset_after = counter.resets_at - now;
            if counter.count >= self.limit {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_after,
                };
            }
            counter.count += 1;
            return RateLimitDecision {
                allowed: true,
                remaining: self.limit - counter.count,
                reset_after,
            };
        }

        counters.insert(
            key.to_string(),
            WindowCounter {
                count: 1,
                resets_at: now + self.window,
            },
        );
        RateLimitDecision {
            allowed: self.limit >= 1,
            remaining: self.limit.saturating_sub(1),
            reset_after: self.window,
        }
    }

    /// Drop counters whose window has ended
    pub fn purge_expired(&self, now: Instant) {
        let mut counters = match self.counters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counters.retain(|_, c| now < c.resets_at);
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.counters.read().map(|c| c.len()).unwrap_or(0)
    }

    fn maybe_sweep(&self, now: Instant) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if calls % self.sweep_every == 0 {
            self.purge_expired(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();

        let remaining: Vec<u32> = (0..3)
            .map(|_| {
                let d = limiter.consume_at("ip", now);
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let blocked = limiter.consume_at("ip", now + Duration::from_secs(10));
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.reset_after, Duration::from_secs(50));
    }

    #[test]
    fn test_window_expiry_resets_counter() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        let now = Instant::now();
        assert!(limiter.consume_at("ip", now).allowed);
        assert!(!limiter.consume_at("ip", now + Duration::from_millis(999)).allowed);
        assert!(limiter.consume_at("ip", now + Duration::from_secs(1)).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.consume("a").allowed);
        assert!(limiter.consume("b").allowed);
        assert!(!limiter.consume("a").allowed);
    }

    #[test]
    fn test_zero_limit_blocks_everything() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.consume("ip").allowed);
        assert!(!limiter.consume("ip").allowed);
    }

    #[test]
    fn test_purge_expired() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let now = Instant::now();
        limiter.consume_at("a", now);
        limiter.consume_at("b", now + Duration::from_millis(500));
        limiter.purge_expired(now + Duration::from_millis(1200));
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
