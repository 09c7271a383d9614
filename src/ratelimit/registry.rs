//! Registration of per-route limiters over one shared window store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::admin::AdminResetFacade;
use super::clock::Clock;
use super::limiter::{LimitConfig, RateLimiter};
use super::store::WindowStore;
use crate::error::Result;

/// Named rate limiters that share a single [`WindowStore`].
///
/// Each protected route registers its own limit; the admin facade handed out
/// by [`LimiterRegistry::admin`] resets windows for all of them.
pub struct LimiterRegistry {
    store: Arc<WindowStore>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl LimiterRegistry {
    /// Create an empty registry on wall-clock time.
    pub fn new() -> Self {
        Self::with_store(Arc::new(WindowStore::new()))
    }

    /// Create an empty registry driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_store(Arc::new(WindowStore::with_clock(clock)))
    }

    /// Create an empty registry over an existing store.
    pub fn with_store(store: Arc<WindowStore>) -> Self {
        Self {
            store,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Register the limit for a protected route.
    ///
    /// Fails if the configuration is invalid. Registering a name again
    /// replaces the previous limiter; existing windows are kept.
    pub fn register(&self, name: &str, config: LimitConfig) -> Result<Arc<RateLimiter>> {
        let limiter = Arc::new(RateLimiter::new(self.store.clone(), config)?);

        info!(
            route = %name,
            max_requests = config.max_requests,
            window = %config.describe_window(),
            "Registered rate limit"
        );

        self.limiters
            .write()
            .insert(name.to_string(), limiter.clone());
        Ok(limiter)
    }

    /// Look up a registered limiter.
    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.read().get(name).cloned()
    }

    /// Names of all registered routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// An admin facade over the shared store.
    pub fn admin(&self) -> AdminResetFacade {
        AdminResetFacade::new(self.store.clone())
    }

    /// The shared window store.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
