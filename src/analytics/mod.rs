//! Analytics-store access: typed read-only queries plus execution
//! persistence. The store itself is an external collaborator; this module
//! owns the client contract, the retry policy, and the SQLite adapter.

pub mod client;
pub mod store;

pub use client::{with_retry, AnalyticsClient, MAX_QUERY_ATTEMPTS};
pub use store::SqliteAnalyticsStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One trade row from the `trades` table. Deduplicated by `trade_id`;
/// query results are strictly ascending in `ts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub trade_id: String,
    pub ts: DateTime<Utc>,
    pub username: String,
    pub proxy_address: String,
    pub market_slug: String,
    pub token_id: String,
    pub side: String,
    pub outcome: String,
    pub price: f64,
    pub size: f64,
    pub notional: f64,
}

/// One row from the `alerts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub alert_type: String,
    pub severity: String,
    pub source: String,
    pub username: Option<String>,
    pub market_slug: String,
    pub title: String,
    pub message: String,
    /// Raw JSON metadata; parsed by the consumer.
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: String,
}

/// One row from the high-edge trader ranking (latest ML score per trader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTraderRow {
    pub username: String,
    pub proxy_address: String,
    /// 0-100 edge score.
    pub edge: f64,
    /// 1 - tier confidence.
    pub inverse_confidence: f64,
    pub cluster: String,
    pub updated_at: DateTime<Utc>,
}

/// One active binary market, YES/NO token ids by venue convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryMarketRow {
    pub slug: String,
    pub yes_token: String,
    pub no_token: String,
    pub end_time: DateTime<Utc>,
    pub volume: f64,
}
