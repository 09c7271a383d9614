//! Core fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, trace};

use super::key::RateKey;
use super::store::{WindowStore, WindowWrite};
use super::window::WindowEntry;
use crate::error::{Result, SelfSyncError};

/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 10;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Configuration for one protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Length of the window
    pub window: Duration,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

impl LimitConfig {
    /// Create a new limit configuration.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Check the limit and convert the window for timestamp arithmetic.
    fn validate(&self) -> Result<TimeDelta> {
        if self.max_requests == 0 {
            return Err(SelfSyncError::RateLimit(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(SelfSyncError::RateLimit(
                "window must be longer than zero".to_string(),
            ));
        }
        TimeDelta::from_std(self.window).map_err(|_| {
            SelfSyncError::RateLimit(format!("window {:?} is too long", self.window))
        })
    }

    /// Human-readable window length, e.g. "1 hour" or "90 seconds".
    pub fn describe_window(&self) -> String {
        let secs = self.window.as_secs();
        let (amount, unit) = match secs {
            s if s >= 86_400 && s % 86_400 == 0 => (s / 86_400, "day"),
            s if s >= 3_600 && s % 3_600 == 0 => (s / 3_600, "hour"),
            s if s >= 60 && s % 60 == 0 => (s / 60, "minute"),
            s => (s, "second"),
        };

        if amount == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", amount, unit)
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request was counted and may proceed
    Allow,
    /// The limit is reached; the window closes after `retry_after`
    Deny { retry_after: Duration },
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Fixed-window limiter for one protected operation.
///
/// Several limiters can share one [`WindowStore`]; keys include the resource,
/// so their windows never collide. The limiter is thread-safe and meant to be
/// shared behind an `Arc`.
pub struct RateLimiter {
    store: Arc<WindowStore>,
    config: LimitConfig,
    window: TimeDelta,
}

impl RateLimiter {
    /// Create a limiter over `store`, rejecting invalid configuration.
    pub fn new(store: Arc<WindowStore>, config: LimitConfig) -> Result<Self> {
        let window = config.validate()?;
        Ok(Self {
            store,
            config,
            window,
        })
    }

    /// Decide whether a request may proceed and record it if so.
    ///
    /// A denied request is not counted. Counting never moves the window
    /// start; only a request arriving after the window closed opens a new one.
    pub fn check_and_record(&self, client: &str, resource: &str) -> Verdict {
        let key = RateKey::new(client, resource);
        let max_requests = self.config.max_requests;
        let window = self.window;

        trace!(key = %key, "Checking rate limit");

        self.store.compute(&key, |current, now| match current {
            None => {
                debug!(
                    key = %key,
                    limit = max_requests,
                    window = ?self.config.window,
                    "Opening rate limit window"
                );
                let entry = WindowEntry::start(now);
                (WindowWrite::Put { entry, ttl: window }, Verdict::Allow)
            }
            Some(entry) if entry.is_expired(now, window) => {
                debug!(key = %key, "Rate limit window rolled over");
                let entry = WindowEntry::start(now);
                (WindowWrite::Put { entry, ttl: window }, Verdict::Allow)
            }
            Some(entry) if entry.count >= max_requests => {
                let retry_after = entry
                    .remaining(now, window)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                debug!(
                    key = %key,
                    count = entry.count,
                    limit = max_requests,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                (WindowWrite::Keep, Verdict::Deny { retry_after })
            }
            Some(entry) => {
                let ttl = entry.remaining(now, window);
                let entry = entry.incremented();
                (WindowWrite::Put { entry, ttl }, Verdict::Allow)
            }
        })
    }

    /// Requests counted in the live window for a client and resource.
    pub fn window_count(&self, client: &str, resource: &str) -> Option<u32> {
        self.store
            .get(&RateKey::new(client, resource))
            .map(|entry| entry.count)
    }

    /// The limit this limiter enforces.
    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// The store holding this limiter's windows.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::Barrier;

    const CLIENT: &str = "1.2.3.4";
    const RESOURCE: &str = "/projects/a";

    fn test_limiter(max_requests: u32, window: Duration) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(WindowStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(store, LimitConfig::new(max_requests, window)).unwrap();
        (clock, limiter)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let store = Arc::new(WindowStore::new());

        let zero_requests = RateLimiter::new(store.clone(), LimitConfig::new(0, DEFAULT_WINDOW));
        assert!(matches!(zero_requests, Err(SelfSyncError::RateLimit(_))));

        let zero_window = RateLimiter::new(store, LimitConfig::new(5, Duration::ZERO));
        assert!(matches!(zero_window, Err(SelfSyncError::RateLimit(_))));
    }

    #[test]
    fn test_default_config() {
        let config = LimitConfig::default();
        assert_eq!(config.max_requests, 10);
        assert_eq!(config.window, Duration::from_secs(3600));
    }

    #[test]
    fn test_describe_window() {
        assert_eq!(LimitConfig::default().describe_window(), "1 hour");
        assert_eq!(LimitConfig::new(1, Duration::from_secs(7200)).describe_window(), "2 hours");
        assert_eq!(LimitConfig::new(1, Duration::from_secs(1800)).describe_window(), "30 minutes");
        assert_eq!(LimitConfig::new(1, Duration::from_secs(90)).describe_window(), "90 seconds");
        assert_eq!(LimitConfig::new(1, Duration::from_secs(86_400)).describe_window(), "1 day");
    }

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let (_, limiter) = test_limiter(5, DEFAULT_WINDOW);

        for i in 1..=5 {
            let verdict = limiter.check_and_record(CLIENT, RESOURCE);
            assert_eq!(verdict, Verdict::Allow, "Request {} should be allowed", i);
        }

        match limiter.check_and_record(CLIENT, RESOURCE) {
            Verdict::Deny { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= DEFAULT_WINDOW);
            }
            Verdict::Allow => panic!("6th request should be denied"),
        }
    }

    #[test]
    fn test_deny_does_not_count() {
        let (_, limiter) = test_limiter(2, DEFAULT_WINDOW);

        limiter.check_and_record(CLIENT, RESOURCE);
        limiter.check_and_record(CLIENT, RESOURCE);
        for _ in 0..5 {
            assert!(!limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        }

        assert_eq!(limiter.window_count(CLIENT, RESOURCE), Some(2));
    }

    #[test]
    fn test_retry_after_shrinks_with_time() {
        let (clock, limiter) = test_limiter(1, Duration::from_secs(600));

        limiter.check_and_record(CLIENT, RESOURCE);
        clock.advance(Duration::from_secs(100));

        assert_eq!(
            limiter.check_and_record(CLIENT, RESOURCE),
            Verdict::Deny {
                retry_after: Duration::from_secs(500)
            }
        );
    }

    #[test]
    fn test_increment_does_not_slide_window() {
        let (clock, limiter) = test_limiter(100, Duration::from_secs(60));

        limiter.check_and_record(CLIENT, RESOURCE);
        for _ in 0..5 {
            clock.advance(Duration::from_secs(10));
            assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        }
        assert_eq!(limiter.window_count(CLIENT, RESOURCE), Some(6));

        // 61s after the first request the window is over, even though the
        // last request was only 11s ago.
        clock.advance(Duration::from_secs(11));
        assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        assert_eq!(limiter.window_count(CLIENT, RESOURCE), Some(1));
    }

    #[test]
    fn test_window_rollover_restores_full_quota() {
        let (clock, limiter) = test_limiter(3, DEFAULT_WINDOW);

        for _ in 0..3 {
            assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        }
        assert!(!limiter.check_and_record(CLIENT, RESOURCE).is_allowed());

        clock.advance(Duration::from_secs(3600 + 5 * 60));

        assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        assert_eq!(limiter.window_count(CLIENT, RESOURCE), Some(1));
        assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
        assert!(!limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (clock, limiter) = test_limiter(1, Duration::from_secs(60));

        limiter.check_and_record(CLIENT, RESOURCE);
        clock.advance(Duration::from_secs(60));
        assert!(!limiter.check_and_record(CLIENT, RESOURCE).is_allowed());

        clock.advance(Duration::from_millis(1));
        assert!(limiter.check_and_record(CLIENT, RESOURCE).is_allowed());
    }

    #[test]
    fn test_keys_are_independent() {
        let (_, limiter) = test_limiter(1, DEFAULT_WINDOW);

        assert!(limiter.check_and_record(CLIENT, "/projects/a").is_allowed());
        assert!(limiter.check_and_record(CLIENT, "/projects/b").is_allowed());
        assert!(limiter.check_and_record("5.6.7.8", "/projects/a").is_allowed());
        assert!(!limiter.check_and_record(CLIENT, "/projects/a").is_allowed());
    }

    #[test]
    fn test_concurrent_checks_respect_limit() {
        const THREADS: usize = 32;
        const LIMIT: u32 = 7;

        let (_, limiter) = test_limiter(LIMIT, DEFAULT_WINDOW);
        let barrier = Barrier::new(THREADS);

        let verdicts: Vec<Verdict> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        limiter.check_and_record(CLIENT, RESOURCE)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let allowed = verdicts.iter().filter(|v| v.is_allowed()).count();
        assert_eq!(allowed, LIMIT as usize);
        assert_eq!(verdicts.len() - allowed, THREADS - LIMIT as usize);
        assert_eq!(limiter.window_count(CLIENT, RESOURCE), Some(LIMIT));
    }
}
