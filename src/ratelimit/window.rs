//! Fixed-window bookkeeping for a single rate key.

use chrono::{DateTime, TimeDelta, Utc};

/// Requests recorded for one key within the current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests counted in this window
    pub count: u32,
    /// When the current window started
    pub window_start: DateTime<Utc>,
}

impl WindowEntry {
    /// A fresh window holding the request that opened it.
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Time spent in this window so far.
    ///
    /// A clock that stepped backwards yields zero rather than a negative span.
    pub fn elapsed(&self, now: DateTime<Utc>) -> TimeDelta {
        (now - self.window_start).max(TimeDelta::zero())
    }

    /// Whether the window has run past its duration.
    ///
    /// The boundary instant itself still belongs to the window.
    pub fn is_expired(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.elapsed(now) > window
    }

    /// Time left until the window closes.
    pub fn remaining(&self, now: DateTime<Utc>, window: TimeDelta) -> TimeDelta {
        (window - self.elapsed(now)).max(TimeDelta::zero())
    }

    /// The same window with one more request counted.
    pub fn incremented(self) -> Self {
        Self {
            count: self.count.saturating_add(1),
            window_start: self.window_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_start_counts_first_request() {
        let entry = WindowEntry::start(at(0));
        assert_eq!(entry.count, 1);
        assert_eq!(entry.window_start, at(0));
    }

    #[test]
    fn test_increment_keeps_window_start() {
        let entry = WindowEntry::start(at(0)).incremented().incremented();
        assert_eq!(entry.count, 3);
        assert_eq!(entry.window_start, at(0));
    }

    #[test]
    fn test_expiry_is_strict() {
        let window = TimeDelta::seconds(60);
        let entry = WindowEntry::start(at(0));

        assert!(!entry.is_expired(at(59), window));
        assert!(!entry.is_expired(at(60), window));
        assert!(entry.is_expired(at(61), window));
    }

    #[test]
    fn test_remaining() {
        let window = TimeDelta::seconds(60);
        let entry = WindowEntry::start(at(0));

        assert_eq!(entry.remaining(at(15), window), TimeDelta::seconds(45));
        assert_eq!(entry.remaining(at(90), window), TimeDelta::zero());
    }

    #[test]
    fn test_clock_stepping_backwards() {
        let entry = WindowEntry::start(at(100));
        assert_eq!(entry.elapsed(at(40)), TimeDelta::zero());
    }
}
