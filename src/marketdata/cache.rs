//! Top-of-book cache.
//!
//! Single writer (the feed adapter), many readers. Each token maps to an
//! `Arc<TopOfBook>` that is replaced wholesale on update, so a reader sees
//! either the fully-old or the fully-new snapshot, never a torn one.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::TopOfBook;

/// Default staleness threshold for trading decisions.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5);

pub struct TobCache {
    books: RwLock<HashMap<String, Arc<TopOfBook>>>,
    max_age: Duration,
    updates: AtomicU64,
}

impl TobCache {
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            max_age,
            updates: AtomicU64::new(0),
        }
    }

    /// Writer path: install a new snapshot for the token.
    pub fn apply(&self, tob: TopOfBook) {
        let token = tob.token_id.clone();
        self.books.write().insert(token, Arc::new(tob));
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest snapshot regardless of age.
    pub fn get(&self, token_id: &str) -> Option<Arc<TopOfBook>> {
        self.books.read().get(token_id).cloned()
    }

    /// Latest snapshot only if it is within the freshness window.
    pub fn get_fresh(&self, token_id: &str, now: DateTime<Utc>) -> Option<Arc<TopOfBook>> {
        self.get(token_id)
            .filter(|tob| tob.is_fresh(now, self.max_age))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    pub fn total_updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

impl Default for TobCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tob(token: &str, ask: f64, updated_at: DateTime<Utc>) -> TopOfBook {
        TopOfBook {
            token_id: token.to_string(),
            bid: ask - 0.02,
            ask,
            bid_size: 100.0,
            ask_size: 100.0,
            updated_at,
        }
    }

    #[test]
    fn freshness_gate() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let cache = TobCache::new();
        cache.apply(tob("fresh", 0.5, now - chrono::Duration::seconds(2)));
        cache.apply(tob("stale", 0.5, now - chrono::Duration::seconds(10)));

        assert!(cache.get_fresh("fresh", now).is_some());
        assert!(cache.get_fresh("stale", now).is_none());
        // Stale snapshots are still readable without the gate.
        assert!(cache.get("stale").is_some());
        assert!(cache.get_fresh("missing", now).is_none());
    }

    #[test]
    fn updates_replace_wholesale() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let cache = TobCache::new();
        cache.apply(tob("tok", 0.50, now));
        let first = cache.get("tok").unwrap();
        cache.apply(tob("tok", 0.55, now));
        let second = cache.get("tok").unwrap();

        // The earlier Arc still reflects the old snapshot.
        assert_eq!(first.ask, 0.50);
        assert_eq!(second.ask, 0.55);
        assert_eq!(cache.total_updates(), 2);
    }
}
