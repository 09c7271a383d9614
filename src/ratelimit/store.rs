//! Concurrent storage for rate limit windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::key::RateKey;
use super::window::WindowEntry;

/// What [`WindowStore::compute`] should do with the entry it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowWrite {
    /// Leave the stored entry untouched
    Keep,
    /// Store `entry`, expiring `ttl` after the current instant
    Put {
        entry: WindowEntry,
        ttl: TimeDelta,
    },
}

#[derive(Debug, Clone, Copy)]
struct StoredWindow {
    entry: WindowEntry,
    expires_at: DateTime<Utc>,
}

impl StoredWindow {
    fn new(entry: WindowEntry, now: DateTime<Utc>, ttl: TimeDelta) -> Self {
        Self {
            entry,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

type WindowMap = DashMap<RateKey, StoredWindow>;

/// Key to window mapping with per-entry expiration.
///
/// Expired entries are never returned, but they are only physically dropped
/// when touched again, by [`WindowStore::purge_expired`], or by a clear.
///
/// The map lives behind a swappable handle: [`WindowStore::clear`] installs a
/// fresh map instead of deleting entries one by one. A write that raced with a
/// clear lands in the discarded map and is simply lost.
pub struct WindowStore {
    windows: RwLock<Arc<WindowMap>>,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create an empty store on wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: RwLock::new(Arc::new(DashMap::new())),
            clock,
        }
    }

    fn windows(&self) -> Arc<WindowMap> {
        self.windows.read().clone()
    }

    /// Look up the live entry for `key`.
    pub fn get(&self, key: &RateKey) -> Option<WindowEntry> {
        let now = self.clock.now();
        self.windows()
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.entry)
    }

    /// Insert or overwrite the entry for `key`, expiring `ttl` from now.
    pub fn set(&self, key: RateKey, entry: WindowEntry, ttl: Duration) {
        let now = self.clock.now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        self.windows().insert(key, StoredWindow::new(entry, now, ttl));
    }

    /// Remove the entry for `key`.
    ///
    /// Returns `true` only if a live entry was removed.
    pub fn remove(&self, key: &RateKey) -> bool {
        let now = self.clock.now();
        self.windows()
            .remove(key)
            .is_some_and(|(_, stored)| stored.is_live(now))
    }

    /// Discard every entry.
    pub fn clear(&self) {
        *self.windows.write() = Arc::new(DashMap::new());
    }

    /// Atomically read and update the entry for `key`.
    ///
    /// `update` sees the live entry (or `None`) and the instant the decision is
    /// made at. It runs while the key's shard is locked, so concurrent calls for
    /// the same key are serialized. It must not call back into this store.
    pub fn compute<R, F>(&self, key: &RateKey, update: F) -> R
    where
        F: FnOnce(Option<WindowEntry>, DateTime<Utc>) -> (WindowWrite, R),
    {
        let windows = self.windows();
        let now = self.clock.now();

        let result = match windows.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let stored = *occupied.get();
                let live = stored.is_live(now).then_some(stored.entry);
                let (write, result) = update(live, now);
                match write {
                    WindowWrite::Put { entry, ttl } => {
                        occupied.insert(StoredWindow::new(entry, now, ttl));
                    }
                    WindowWrite::Keep if live.is_none() => {
                        occupied.remove();
                    }
                    WindowWrite::Keep => {}
                }
                result
            }
            Entry::Vacant(vacant) => {
                let (write, result) = update(None, now);
                if let WindowWrite::Put { entry, ttl } = write {
                    vacant.insert(StoredWindow::new(entry, now, ttl));
                }
                result
            }
        };
        result
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let windows = self.windows();
        let before = windows.len();
        windows.retain(|_, stored| stored.is_live(now));
        let purged = before.saturating_sub(windows.len());

        if purged > 0 {
            debug!(purged = purged, "Purged expired rate limit windows");
        }
        purged
    }

    /// Number of entries physically held, expired ones included.
    pub fn len(&self) -> usize {
        self.windows().len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.windows().is_empty()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new()
    }
}
