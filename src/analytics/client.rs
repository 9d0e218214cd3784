//! Analytics client contract and the shared transient-retry policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{AlertRow, BinaryMarketRow, EdgeTraderRow, TradeRow};
use crate::error::StoreError;
use crate::models::{ExecutionRecord, IndexConstituent};

pub const MAX_QUERY_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
/// Per-attempt deadline; expiry counts as a transient failure.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

/// Read-only queries against the analytics store, plus the single
/// execution-persistence write. All operations are idempotent reads except
/// `insert_execution`, which is append-only keyed by signal id.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    /// Trades by the given proxy addresses with `ts` in `(from, to]`,
    /// ascending, at most 100 rows. Address matching is case-insensitive.
    async fn trades_for_addresses(
        &self,
        addresses: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, StoreError>;

    /// ACTIVE alerts of the given types created in `(from, to]`, at most 50.
    async fn active_alerts(
        &self,
        alert_types: &[&str],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertRow>, StoreError>;

    /// Latest ML ranking filtered to `edge >= min_edge` and
    /// `1 - confidence < max_inverse_confidence`, best edge first.
    async fn high_edge_traders(
        &self,
        min_edge: f64,
        max_inverse_confidence: f64,
        limit: usize,
    ) -> Result<Vec<EdgeTraderRow>, StoreError>;

    /// Active binary markets ending within the next seven days, ordered by
    /// volume descending, at most 50.
    async fn binary_markets(&self, now: DateTime<Utc>) -> Result<Vec<BinaryMarketRow>, StoreError>;

    /// Current constituents of a mirror index.
    async fn index_constituents(
        &self,
        index_type: &str,
    ) -> Result<Vec<IndexConstituent>, StoreError>;

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Retry a store operation on transient failures: up to three attempts with
/// exponential backoff, well inside the two-second budget. Permanent errors
/// and exhaustion surface to the caller, which logs and skips the tick;
/// highwater marks only advance after success.
pub async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(QUERY_DEADLINE, f()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "{op}: query deadline expired"
            ))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_QUERY_ATTEMPTS => {
                debug!(op, attempt, error = %err, "transient store error, retrying");
                sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => {
                warn!(op, attempt, error = %err, "store query failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Transient("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_QUERY_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_errors_never_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, StoreError> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Permanent("bad query".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
