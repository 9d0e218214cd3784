//! Index weight provider: cached {index -> constituents} with TTL.
//!
//! Refresh is single-flight per provider: whichever caller finds the
//! snapshot stale and wins the refresh lock reloads it; concurrent readers
//! keep the previous snapshot and never block on the loader.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analytics::{with_retry, AnalyticsClient};
use crate::models::IndexConstituent;

pub const DEFAULT_INDEX_TTL: Duration = Duration::from_secs(30);

pub struct IndexSnapshot {
    pub index: String,
    pub constituents: Vec<IndexConstituent>,
    by_proxy: HashMap<String, usize>,
    pub loaded_at: DateTime<Utc>,
}

impl IndexSnapshot {
    fn empty(index: &str, loaded_at: DateTime<Utc>) -> Self {
        Self {
            index: index.to_string(),
            constituents: Vec::new(),
            by_proxy: HashMap::new(),
            loaded_at,
        }
    }

    fn build(index: &str, mut constituents: Vec<IndexConstituent>, loaded_at: DateTime<Utc>) -> Self {
        // Weights must sum to at most one; scale down a snapshot that
        // violates the invariant rather than over-allocating capital.
        let total: f64 = constituents.iter().map(|c| c.weight).sum();
        if total > 1.0 + 1e-9 {
            warn!(index, total, "index weights exceed 1.0, normalising");
            for c in &mut constituents {
                c.weight /= total;
            }
        }

        let by_proxy = constituents
            .iter()
            .enumerate()
            .map(|(i, c)| (c.proxy_address.to_lowercase(), i))
            .collect();
        Self {
            index: index.to_string(),
            constituents,
            by_proxy,
            loaded_at,
        }
    }

    pub fn lookup(&self, proxy_address: &str) -> Option<&IndexConstituent> {
        self.by_proxy
            .get(&proxy_address.to_lowercase())
            .map(|&i| &self.constituents[i])
    }

    pub fn addresses(&self) -> Vec<String> {
        self.constituents
            .iter()
            .map(|c| c.proxy_address.to_lowercase())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.constituents.is_empty()
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.loaded_at).num_milliseconds() <= ttl.as_millis() as i64
            && !self.constituents.is_empty()
    }
}

pub struct IndexWeightProvider {
    analytics: Arc<dyn AnalyticsClient>,
    ttl: Duration,
    snapshots: ArcSwap<HashMap<String, Arc<IndexSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl IndexWeightProvider {
    pub fn new(analytics: Arc<dyn AnalyticsClient>) -> Self {
        Self::with_ttl(analytics, DEFAULT_INDEX_TTL)
    }

    pub fn with_ttl(analytics: Arc<dyn AnalyticsClient>, ttl: Duration) -> Self {
        Self {
            analytics,
            ttl,
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current snapshot for an index. Stale or missing snapshots trigger a
    /// single-flight reload; losers of the refresh race get the previous
    /// snapshot immediately.
    pub async fn snapshot(&self, index: &str, now: DateTime<Utc>) -> Arc<IndexSnapshot> {
        if let Some(existing) = self.snapshots.load().get(index) {
            if existing.is_fresh(now, self.ttl) {
                return existing.clone();
            }
        }

        let Ok(_guard) = self.refresh_lock.try_lock() else {
            // Another caller is refreshing; serve the previous snapshot.
            return self
                .snapshots
                .load()
                .get(index)
                .cloned()
                .unwrap_or_else(|| Arc::new(IndexSnapshot::empty(index, now)));
        };

        // Re-check under the lock: the previous holder may have refreshed.
        if let Some(existing) = self.snapshots.load().get(index) {
            if existing.is_fresh(now, self.ttl) {
                return existing.clone();
            }
        }

        let index_owned = index.to_string();
        let analytics = self.analytics.clone();
        let loaded = with_retry("index_constituents", || {
            let analytics = analytics.clone();
            let index = index_owned.clone();
            async move { analytics.index_constituents(&index).await }
        })
        .await;

        match loaded {
            Ok(constituents) => {
                debug!(index, count = constituents.len(), "index snapshot refreshed");
                let snapshot = Arc::new(IndexSnapshot::build(index, constituents, now));
                let mut next: HashMap<String, Arc<IndexSnapshot>> =
                    self.snapshots.load().as_ref().clone();
                next.insert(index.to_string(), snapshot.clone());
                self.snapshots.store(Arc::new(next));
                snapshot
            }
            Err(e) => {
                warn!(index, error = %e, "index refresh failed, serving previous snapshot");
                self.snapshots
                    .load()
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(IndexSnapshot::empty(index, now)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SqliteAnalyticsStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn constituent(proxy: &str, weight: f64) -> IndexConstituent {
        IndexConstituent {
            username: proxy.trim_start_matches("0x").to_string(),
            proxy_address: proxy.to_string(),
            weight,
            rank: 1,
            estimated_capital_usd: 100_000.0,
            score: 80.0,
            strategy_tag: "momentum".into(),
            last_trade_at: None,
            indexed_at: t0(),
        }
    }

    #[tokio::test]
    async fn snapshot_loads_and_caches() {
        let store = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        store
            .upsert_index_constituent("PSI-10", &constituent("0xAAA", 0.10))
            .await
            .unwrap();

        let provider = IndexWeightProvider::new(store.clone());
        let snap = provider.snapshot("PSI-10", t0()).await;
        assert_eq!(snap.constituents.len(), 1);
        assert!(snap.lookup("0xaaa").is_some());
        assert!(snap.lookup("0XAAA").is_some());

        // Within TTL a new constituent is not picked up yet.
        store
            .upsert_index_constituent("PSI-10", &constituent("0xBBB", 0.05))
            .await
            .unwrap();
        let cached = provider
            .snapshot("PSI-10", t0() + chrono::Duration::seconds(5))
            .await;
        assert_eq!(cached.constituents.len(), 1);

        // Past TTL the refresh sees both.
        let refreshed = provider
            .snapshot("PSI-10", t0() + chrono::Duration::seconds(60))
            .await;
        assert_eq!(refreshed.constituents.len(), 2);
    }

    #[tokio::test]
    async fn overweight_snapshot_is_normalised() {
        let store = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        store
            .upsert_index_constituent("PSI-X", &constituent("0xAAA", 0.9))
            .await
            .unwrap();
        store
            .upsert_index_constituent("PSI-X", &constituent("0xBBB", 0.6))
            .await
            .unwrap();

        let provider = IndexWeightProvider::new(store);
        let snap = provider.snapshot("PSI-X", t0()).await;
        let total: f64 = snap.constituents.iter().map(|c| c.weight).sum();
        assert!(total <= 1.0 + 1e-9);
    }

    #[tokio::test]
    async fn unknown_index_yields_empty_snapshot() {
        let store = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        let provider = IndexWeightProvider::new(store);
        let snap = provider.snapshot("PSI-NONE", t0()).await;
        assert!(snap.is_empty());
    }
}
