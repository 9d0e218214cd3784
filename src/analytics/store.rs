//! SQLite adapter for the analytics store.
//!
//! Read side mirrors the external schema (`trades`, `alerts`, `ml_scores`,
//! `markets`, `psi_index`); write side is the append-only `executions`
//! table plus ingest helpers used by the loader and the test suite.
//!
//! Address filters are always bound as parameters, never interpolated, so
//! proxy strings containing quotes or commas cannot break the query.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{AlertRow, AnalyticsClient, BinaryMarketRow, EdgeTraderRow, TradeRow};
use crate::error::StoreError;
use crate::models::{ExecutionRecord, IndexConstituent, Side};

const TRADES_QUERY_LIMIT: usize = 100;
const ALERTS_QUERY_LIMIT: usize = 50;
const MARKETS_QUERY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct SqliteAnalyticsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAnalyticsStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open analytics db")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory analytics db")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                username TEXT NOT NULL,
                proxy_address TEXT NOT NULL,
                market_slug TEXT NOT NULL,
                token_id TEXT NOT NULL,
                side TEXT NOT NULL,
                outcome TEXT NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                notional REAL NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_proxy_ts ON trades(proxy_address, ts)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                source TEXT NOT NULL,
                username TEXT,
                market_slug TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                status TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ml_scores (
                username TEXT NOT NULL,
                proxy_address TEXT PRIMARY KEY,
                ml_score REAL NOT NULL,
                tier_confidence REAL NOT NULL,
                ml_tier TEXT NOT NULL,
                calculated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS markets (
                slug TEXT PRIMARY KEY,
                token_ids TEXT NOT NULL,
                end_date INTEGER NOT NULL,
                active INTEGER NOT NULL,
                volume_num REAL NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS psi_index (
                index_type TEXT NOT NULL,
                username TEXT NOT NULL,
                proxy_address TEXT NOT NULL,
                weight REAL NOT NULL,
                rank INTEGER NOT NULL,
                estimated_capital REAL NOT NULL DEFAULT 0,
                smart_money_score REAL NOT NULL,
                strategy_type TEXT NOT NULL,
                last_trade_at INTEGER,
                indexed_at INTEGER NOT NULL,
                PRIMARY KEY (index_type, proxy_address)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS executions (
                signal_id TEXT PRIMARY KEY,
                fund_id TEXT NOT NULL,
                trader_username TEXT NOT NULL,
                market_slug TEXT NOT NULL,
                token_id TEXT NOT NULL,
                outcome TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                trader_shares REAL NOT NULL,
                fund_shares REAL NOT NULL,
                execution_price REAL NOT NULL,
                order_id TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                executed_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_fund_ts ON executions(fund_id, executed_at DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- ingest helpers (loader + tests) ----------------------------------

    pub async fn insert_trade(&self, row: &TradeRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO trades
             (trade_id, ts, username, proxy_address, market_slug, token_id, side, outcome, price, size, notional)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.trade_id,
                row.ts.timestamp_millis(),
                row.username,
                row.proxy_address.to_lowercase(),
                row.market_slug,
                row.token_id,
                row.side,
                row.outcome,
                row.price,
                row.size,
                row.notional,
            ],
        )?;
        Ok(())
    }

    pub async fn insert_alert(&self, row: &AlertRow) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO alerts
             (id, alert_type, severity, source, username, market_slug, title, message, metadata, created_at, expires_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.id,
                row.alert_type,
                row.severity,
                row.source,
                row.username,
                row.market_slug,
                row.title,
                row.message,
                row.metadata,
                row.created_at.timestamp_millis(),
                row.expires_at.map(|t| t.timestamp_millis()),
                row.status,
            ],
        )?;
        Ok(())
    }

    pub async fn upsert_ml_score(
        &self,
        username: &str,
        proxy_address: &str,
        ml_score: f64,
        tier_confidence: f64,
        ml_tier: &str,
        calculated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO ml_scores
             (username, proxy_address, ml_score, tier_confidence, ml_tier, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                username,
                proxy_address.to_lowercase(),
                ml_score,
                tier_confidence,
                ml_tier,
                calculated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn upsert_market(
        &self,
        slug: &str,
        token_ids: &[&str],
        end_date: DateTime<Utc>,
        active: bool,
        volume: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO markets (slug, token_ids, end_date, active, volume_num)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                slug,
                serde_json::to_string(token_ids)?,
                end_date.timestamp_millis(),
                active as i64,
                volume,
            ],
        )?;
        Ok(())
    }

    pub async fn upsert_index_constituent(
        &self,
        index_type: &str,
        constituent: &IndexConstituent,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO psi_index
             (index_type, username, proxy_address, weight, rank, estimated_capital, smart_money_score, strategy_type, last_trade_at, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                index_type,
                constituent.username,
                constituent.proxy_address.to_lowercase(),
                constituent.weight,
                constituent.rank,
                constituent.estimated_capital_usd,
                constituent.score,
                constituent.strategy_tag,
                constituent.last_trade_at.map(|t| t.timestamp_millis()),
                constituent.indexed_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn map_sql_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

fn parse_side(side: &str) -> Side {
    if side.eq_ignore_ascii_case("SELL") {
        Side::Sell
    } else {
        Side::Buy
    }
}

#[async_trait::async_trait]
impl AnalyticsClient for SqliteAnalyticsStore {
    async fn trades_for_addresses(
        &self,
        addresses: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, StoreError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; addresses.len()].join(", ");
        let sql = format!(
            "SELECT trade_id, ts, username, proxy_address, market_slug, token_id, side, outcome, price, size, notional
             FROM trades
             WHERE proxy_address IN ({placeholders}) AND ts > ? AND ts <= ?
             ORDER BY ts ASC
             LIMIT {TRADES_QUERY_LIMIT}"
        );

        let mut bound: Vec<Box<dyn ToSql>> = addresses
            .iter()
            .map(|a| Box::new(a.to_lowercase()) as Box<dyn ToSql>)
            .collect();
        bound.push(Box::new(from.timestamp_millis()));
        bound.push(Box::new(to.timestamp_millis()));

        let mut stmt = conn.prepare_cached(&sql).map_err(map_sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter().map(|b| b.as_ref())), |row| {
                Ok(TradeRow {
                    trade_id: row.get(0)?,
                    ts: ms_to_datetime(row.get(1)?),
                    username: row.get(2)?,
                    proxy_address: row.get(3)?,
                    market_slug: row.get(4)?,
                    token_id: row.get(5)?,
                    side: row.get(6)?,
                    outcome: row.get(7)?,
                    price: row.get(8)?,
                    size: row.get(9)?,
                    notional: row.get(10)?,
                })
            })
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;
        Ok(rows)
    }

    async fn active_alerts(
        &self,
        alert_types: &[&str],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertRow>, StoreError> {
        if alert_types.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; alert_types.len()].join(", ");
        let sql = format!(
            "SELECT id, alert_type, severity, source, username, market_slug, title, message, metadata, created_at, expires_at, status
             FROM alerts
             WHERE alert_type IN ({placeholders}) AND status = 'ACTIVE' AND created_at > ? AND created_at <= ?
             ORDER BY created_at ASC
             LIMIT {ALERTS_QUERY_LIMIT}"
        );

        let mut bound: Vec<Box<dyn ToSql>> = alert_types
            .iter()
            .map(|t| Box::new(t.to_string()) as Box<dyn ToSql>)
            .collect();
        bound.push(Box::new(from.timestamp_millis()));
        bound.push(Box::new(to.timestamp_millis()));

        let mut stmt = conn.prepare_cached(&sql).map_err(map_sql_err)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter().map(|b| b.as_ref())), |row| {
                Ok(AlertRow {
                    id: row.get(0)?,
                    alert_type: row.get(1)?,
                    severity: row.get(2)?,
                    source: row.get(3)?,
                    username: row.get(4)?,
                    market_slug: row.get(5)?,
                    title: row.get(6)?,
                    message: row.get(7)?,
                    metadata: row.get(8)?,
                    created_at: ms_to_datetime(row.get(9)?),
                    expires_at: row.get::<_, Option<i64>>(10)?.map(ms_to_datetime),
                    status: row.get(11)?,
                })
            })
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;
        Ok(rows)
    }

    async fn high_edge_traders(
        &self,
        min_edge: f64,
        max_inverse_confidence: f64,
        limit: usize,
    ) -> Result<Vec<EdgeTraderRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT username, proxy_address, ml_score, 1.0 - tier_confidence, ml_tier, calculated_at
                 FROM ml_scores
                 WHERE ml_score >= ?1 AND (1.0 - tier_confidence) < ?2
                 ORDER BY ml_score DESC
                 LIMIT ?3",
            )
            .map_err(map_sql_err)?;
        let rows = stmt
            .query_map(
                params![min_edge, max_inverse_confidence, limit as i64],
                |row| {
                    Ok(EdgeTraderRow {
                        username: row.get(0)?,
                        proxy_address: row.get(1)?,
                        edge: row.get(2)?,
                        inverse_confidence: row.get(3)?,
                        cluster: row.get(4)?,
                        updated_at: ms_to_datetime(row.get(5)?),
                    })
                },
            )
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;
        Ok(rows)
    }

    async fn binary_markets(&self, now: DateTime<Utc>) -> Result<Vec<BinaryMarketRow>, StoreError> {
        let horizon = now + chrono::Duration::days(7);
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT slug, token_ids, end_date, volume_num
                 FROM markets
                 WHERE active = 1 AND end_date > ?1 AND end_date < ?2
                 ORDER BY volume_num DESC
                 LIMIT ?3",
            )
            .map_err(map_sql_err)?;
        let raw = stmt
            .query_map(
                params![
                    now.timestamp_millis(),
                    horizon.timestamp_millis(),
                    MARKETS_QUERY_LIMIT as i64
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;

        let mut markets = Vec::with_capacity(raw.len());
        for (slug, token_ids, end_ms, volume) in raw {
            // Token index 0 is YES, 1 is NO by venue convention.
            let tokens: Vec<String> = serde_json::from_str(&token_ids).unwrap_or_default();
            if tokens.len() < 2 {
                tracing::warn!(%slug, "market row missing binary token pair, skipping");
                continue;
            }
            markets.push(BinaryMarketRow {
                slug,
                yes_token: tokens[0].clone(),
                no_token: tokens[1].clone(),
                end_time: ms_to_datetime(end_ms),
                volume,
            });
        }
        Ok(markets)
    }

    async fn index_constituents(
        &self,
        index_type: &str,
    ) -> Result<Vec<IndexConstituent>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT username, proxy_address, weight, rank, estimated_capital, smart_money_score, strategy_type, last_trade_at, indexed_at
                 FROM psi_index
                 WHERE index_type = ?1
                 ORDER BY rank ASC",
            )
            .map_err(map_sql_err)?;
        let rows = stmt
            .query_map(params![index_type], |row| {
                Ok(IndexConstituent {
                    username: row.get(0)?,
                    proxy_address: row.get(1)?,
                    weight: row.get(2)?,
                    rank: row.get(3)?,
                    estimated_capital_usd: row.get(4)?,
                    score: row.get(5)?,
                    strategy_tag: row.get(6)?,
                    last_trade_at: row.get::<_, Option<i64>>(7)?.map(ms_to_datetime),
                    indexed_at: ms_to_datetime(row.get(8)?),
                })
            })
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;
        Ok(rows)
    }

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO executions
             (signal_id, fund_id, trader_username, market_slug, token_id, outcome, signal_type,
              trader_shares, fund_shares, execution_price, order_id, detected_at, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.signal_id,
                record.fund_id,
                record.trader_username,
                record.market_slug,
                record.token_id,
                record.outcome,
                record.side.as_str(),
                record.trader_shares,
                record.fund_shares,
                record.execution_price,
                record.order_id,
                record.detected_at.timestamp_millis(),
                record.executed_at.timestamp_millis(),
            ],
        )
        .map_err(map_sql_err)?;
        Ok(())
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare_cached(
                "SELECT signal_id, fund_id, trader_username, market_slug, token_id, outcome, signal_type,
                        trader_shares, fund_shares, execution_price, order_id, detected_at, executed_at
                 FROM executions
                 ORDER BY executed_at DESC
                 LIMIT ?1",
            )
            .map_err(map_sql_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ExecutionRecord {
                    signal_id: row.get(0)?,
                    fund_id: row.get(1)?,
                    trader_username: row.get(2)?,
                    market_slug: row.get(3)?,
                    token_id: row.get(4)?,
                    outcome: row.get(5)?,
                    side: parse_side(&row.get::<_, String>(6)?),
                    trader_shares: row.get(7)?,
                    fund_shares: row.get(8)?,
                    execution_price: row.get(9)?,
                    order_id: row.get(10)?,
                    detected_at: ms_to_datetime(row.get(11)?),
                    executed_at: ms_to_datetime(row.get(12)?),
                })
            })
            .map_err(map_sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_sql_err)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn trade(id: &str, proxy: &str, ts: DateTime<Utc>) -> TradeRow {
        TradeRow {
            trade_id: id.to_string(),
            ts,
            username: "alice".into(),
            proxy_address: proxy.to_string(),
            market_slug: "will-it-rain".into(),
            token_id: "tok-yes".into(),
            side: "BUY".into(),
            outcome: "Yes".into(),
            price: 0.5,
            size: 100.0,
            notional: 50.0,
        }
    }

    #[tokio::test]
    async fn trade_window_is_half_open_and_ascending() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        let addrs = vec!["0xabc".to_string()];
        for (i, offset) in [0i64, 10, 20, 30].iter().enumerate() {
            store
                .insert_trade(&trade(
                    &format!("t{i}"),
                    "0xABC",
                    t0() + chrono::Duration::seconds(*offset),
                ))
                .await
                .unwrap();
        }

        // (t0, t0+20] excludes the boundary trade at t0 and includes t0+20.
        let rows = store
            .trades_for_addresses(&addrs, t0(), t0() + chrono::Duration::seconds(20))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert!(rows.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[tokio::test]
    async fn address_matching_is_case_insensitive() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        store
            .insert_trade(&trade("t1", "0xDeAdBeEf", t0()))
            .await
            .unwrap();

        let rows = store
            .trades_for_addresses(
                &["0XDEADBEEF".to_string()],
                t0() - chrono::Duration::seconds(1),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn hostile_addresses_bind_safely() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        let hostile = "0x1'); drop table trades; --".to_string();
        store.insert_trade(&trade("t1", &hostile, t0())).await.unwrap();
        store.insert_trade(&trade("t2", "0x2,0x3", t0())).await.unwrap();

        let rows = store
            .trades_for_addresses(
                &[hostile.clone(), "0x2,0x3".to_string()],
                t0() - chrono::Duration::seconds(1),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        // The table survived the hostile token.
        let again = store
            .trades_for_addresses(
                &[hostile],
                t0() - chrono::Duration::seconds(1),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn alerts_filter_status_and_type() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        let mk = |id: &str, alert_type: &str, status: &str| AlertRow {
            id: id.to_string(),
            alert_type: alert_type.to_string(),
            severity: "HIGH".into(),
            source: "scanner".into(),
            username: None,
            market_slug: "m".into(),
            title: "t".into(),
            message: "m".into(),
            metadata: "{}".into(),
            created_at: t0(),
            expires_at: None,
            status: status.to_string(),
        };
        store.insert_alert(&mk("a1", "INSIDER_DETECTED", "ACTIVE")).await.unwrap();
        store.insert_alert(&mk("a2", "INSIDER_DETECTED", "RESOLVED")).await.unwrap();
        store.insert_alert(&mk("a3", "PRICE_MOVE", "ACTIVE")).await.unwrap();

        let rows = store
            .active_alerts(
                &["INSIDER_DETECTED", "UNUSUAL_ACTIVITY"],
                t0() - chrono::Duration::minutes(5),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a1");
    }

    #[tokio::test]
    async fn high_edge_traders_ranked_and_filtered() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        store.upsert_ml_score("a", "0xa", 92.0, 0.8, "S", t0()).await.unwrap();
        store.upsert_ml_score("b", "0xb", 75.0, 0.7, "A", t0()).await.unwrap();
        store.upsert_ml_score("c", "0xc", 95.0, 0.3, "S", t0()).await.unwrap(); // low confidence
        store.upsert_ml_score("d", "0xd", 60.0, 0.9, "B", t0()).await.unwrap(); // low edge

        let rows = store.high_edge_traders(70.0, 0.5, 50).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!((rows[0].inverse_confidence - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn binary_markets_window_and_order() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        let day = chrono::Duration::days(1);
        store.upsert_market("soon", &["y1", "n1"], t0() + day, true, 100.0).await.unwrap();
        store.upsert_market("big", &["y2", "n2"], t0() + day * 2, true, 900.0).await.unwrap();
        store.upsert_market("past", &["y3", "n3"], t0() - day, true, 500.0).await.unwrap();
        store.upsert_market("far", &["y4", "n4"], t0() + day * 10, true, 500.0).await.unwrap();
        store.upsert_market("inactive", &["y5", "n5"], t0() + day, false, 500.0).await.unwrap();

        let rows = store.binary_markets(t0()).await.unwrap();
        let slugs: Vec<&str> = rows.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["big", "soon"]);
        assert_eq!(rows[0].yes_token, "y2");
        assert_eq!(rows[0].no_token, "n2");
    }

    #[tokio::test]
    async fn executions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteAnalyticsStore::new(path).unwrap();
            store.insert_trade(&trade("t1", "0xabc", t0())).await.unwrap();
        }

        let reopened = SqliteAnalyticsStore::new(path).unwrap();
        let rows = reopened
            .trades_for_addresses(
                &["0xabc".to_string()],
                t0() - chrono::Duration::seconds(1),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn executions_roundtrip_and_dedupe() {
        let store = SqliteAnalyticsStore::in_memory().unwrap();
        let record = ExecutionRecord {
            signal_id: "s1".into(),
            fund_id: "PSI-10".into(),
            trader_username: "alice".into(),
            market_slug: "m".into(),
            token_id: "tok".into(),
            outcome: "Yes".into(),
            side: Side::Buy,
            trader_shares: 1000.0,
            fund_shares: 10.0,
            execution_price: 0.51,
            order_id: "o1".into(),
            detected_at: t0(),
            executed_at: t0() + chrono::Duration::seconds(7),
        };
        store.insert_execution(&record).await.unwrap();
        // Same signal id again is a no-op (at-most-once per signal).
        store.insert_execution(&record).await.unwrap();

        let rows = store.recent_executions(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].signal_id, "s1");
        assert_eq!(rows[0].side, Side::Buy);
        assert!((rows[0].fund_shares - 10.0).abs() < 1e-9);
    }
}
