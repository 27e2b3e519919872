//! Fixed-window rate limiter
//!
//! Each partition key gets `limit` requests per window. The window starts with
//! the first request seen for the key and resets once `window` has elapsed.
//! The per-entry lock in the map makes increment-and-compare atomic, so
//! concurrent bursts cannot overrun the quota.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request is within quota
    Allowed {
        /// Requests left in the current window
        remaining: u32,
        /// Time until the window resets
        reset_after: Duration,
    },
    /// Quota exhausted
    Limited {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Rate limiter keyed by partition
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Build a limiter from configuration, or `None` when limiting is disabled
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled()
            .then(|| Self::new(config.limit, config.window()))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key` against the current window
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window {
                started: now,
                count: 0,
            });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started));

        if entry.count >= self.limit {
            return RateLimitDecision::Limited {
                retry_after: reset_after,
            };
        }

        entry.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.limit - entry.count,
            reset_after,
        }
    }

    /// Drop windows that have expired, returning how many were removed
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - self.windows.len()
    }

    /// Number of partitions currently tracked
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// Whole seconds a client should wait, rounded up and never zero
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sixty_first_request_is_limited() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..60 {
            let decision = limiter.check_at("ip:10.0.0.1", start + Duration::from_millis(i));
            assert!(decision.is_allowed(), "request {} should pass", i + 1);
        }

        let decision = limiter.check_at("ip:10.0.0.1", start + Duration::from_secs(30));
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("k", start).is_allowed());
        assert!(limiter.check_at("k", start).is_allowed());
        assert!(!limiter.check_at("k", start + Duration::from_secs(59)).is_allowed());

        // Window elapsed
        assert_eq!(
            limiter.check_at("k", start + Duration::from_secs(60)),
            RateLimitDecision::Allowed {
                remaining: 1,
                reset_after: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_partitions_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("ip:1.1.1.1", now).is_allowed());
        assert!(!limiter.check_at("ip:1.1.1.1", now).is_allowed());
        assert!(limiter.check_at("ip:2.2.2.2", now).is_allowed());
        assert!(limiter.check_at("credential", now).is_allowed());
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let now = Instant::now();

        let remaining: Vec<u32> = (0..3)
            .map(|_| match limiter.check_at("k", now) {
                RateLimitDecision::Allowed { remaining, .. } => remaining,
                RateLimitDecision::Limited { .. } => panic!("unexpected limit"),
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn test_concurrent_burst_never_overruns_quota() {
        let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(3600)));
        let allowed = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let allowed = allowed.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        if limiter.check("shared").is_allowed() {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 60);
    }

    #[test]
    fn test_prune_expired_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();

        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(50));
        assert_eq!(limiter.tracked(), 2);

        assert_eq!(limiter.prune(start + Duration::from_secs(70)), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_from_config() {
        assert!(RateLimiter::from_config(&RateLimitConfig {
            limit: 0,
            window_secs: 60
        })
        .is_none());

        let limiter = RateLimiter::from_config(&RateLimitConfig::default()).unwrap();
        assert_eq!(limiter.limit(), 60);
        assert_eq!(limiter.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_secs(Duration::from_millis(29_001)), 30);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
