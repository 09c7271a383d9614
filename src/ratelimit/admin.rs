//! Administrative overrides for rate limit windows.

use std::sync::Arc;

use tracing::info;

use super::key::RateKey;
use super::store::WindowStore;

/// Privileged reset operations over a shared [`WindowStore`].
///
/// The facade does not authenticate anyone; callers must check credentials
/// before invoking it.
#[derive(Clone)]
pub struct AdminResetFacade {
    store: Arc<WindowStore>,
}

impl AdminResetFacade {
    /// Create a facade over `store`.
    pub fn new(store: Arc<WindowStore>) -> Self {
        Self { store }
    }

    /// Forget the window for one client and resource.
    ///
    /// Returns whether a live window existed.
    pub fn reset_one(&self, client: &str, resource: &str) -> bool {
        let key = RateKey::new(client, resource);
        let removed = self.store.remove(&key);
        info!(key = %key, removed = removed, "Rate limit reset requested");
        removed
    }

    /// Forget every window.
    pub fn reset_all(&self) {
        self.store.clear();
        info!("All rate limits reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::limiter::{LimitConfig, RateLimiter};
    use std::sync::Barrier;
    use std::time::Duration;

    fn setup(max_requests: u32) -> (RateLimiter, AdminResetFacade) {
        let store = Arc::new(WindowStore::new());
        let limiter = RateLimiter::new(
            store.clone(),
            LimitConfig::new(max_requests, Duration::from_secs(3600)),
        )
        .unwrap();
        (limiter, AdminResetFacade::new(store))
    }

    #[test]
    fn test_reset_one_existing_key() {
        let (limiter, admin) = setup(2);
        limiter.check_and_record("1.2.3.4", "/projects/a");
        limiter.check_and_record("1.2.3.4", "/projects/a");
        assert!(!limiter.check_and_record("1.2.3.4", "/projects/a").is_allowed());

        assert!(admin.reset_one("1.2.3.4", "/projects/a"));

        assert!(limiter.check_and_record("1.2.3.4", "/projects/a").is_allowed());
        assert_eq!(limiter.window_count("1.2.3.4", "/projects/a"), Some(1));
    }

    #[test]
    fn test_reset_one_unknown_key() {
        let (limiter, admin) = setup(2);
        limiter.check_and_record("1.2.3.4", "/projects/a");

        assert!(!admin.reset_one("9.9.9.9", "/projects/a"));
        assert!(!admin.reset_one("1.2.3.4", "/projects/b"));
        assert_eq!(limiter.window_count("1.2.3.4", "/projects/a"), Some(1));
    }

    #[test]
    fn test_reset_all() {
        let (limiter, admin) = setup(1);
        for client in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            limiter.check_and_record(client, "/projects/a");
            assert!(!limiter.check_and_record(client, "/projects/a").is_allowed());
        }

        admin.reset_all();

        assert!(limiter.store().is_empty());
        for client in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            assert!(limiter.check_and_record(client, "/projects/a").is_allowed());
        }
    }

    #[test]
    fn test_reset_all_during_concurrent_checks() {
        const MAX: u32 = 5;
        const WORKERS: usize = 8;
        const CLIENTS: [&str; 2] = ["10.0.0.1", "10.0.0.2"];
        const RESOURCES: [&str; 3] = ["/projects/a", "/projects/b", "/projects/c"];

        let (limiter, admin) = setup(MAX);
        let barrier = Barrier::new(WORKERS + 1);

        std::thread::scope(|scope| {
            for worker in 0..WORKERS {
                let (limiter, barrier) = (&limiter, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    for i in 0..500 {
                        let client = CLIENTS[worker % CLIENTS.len()];
                        limiter.check_and_record(client, RESOURCES[i % RESOURCES.len()]);
                    }
                });
            }

            let (admin, barrier) = (&admin, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..200 {
                    admin.reset_all();
                    std::thread::yield_now();
                }
            });
        });

        for client in CLIENTS {
            for resource in RESOURCES {
                let count = limiter.window_count(client, resource).unwrap_or(0);
                assert!(count <= MAX, "{} on {} counted {}", client, resource, count);
            }
        }

        admin.reset_all();
        assert!(limiter.store().is_empty());
        assert!(limiter.check_and_record(CLIENTS[0], RESOURCES[0]).is_allowed());
    }

    #[test]
    fn test_reset_all_on_empty_store() {
        let (limiter, admin) = setup(1);
        admin.reset_all();
        assert!(limiter.store().is_empty());
    }
}
