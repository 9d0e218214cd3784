//! Alert-follower strategy: turn fresh high-severity analytic alerts into
//! alpha signals, with a per-market cooldown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BoundedIdSet, Strategy};
use crate::analytics::{with_retry, AlertRow, AnalyticsClient};
use crate::clock::Clock;
use crate::marketdata::TobCache;
use crate::models::{AlphaAction, AlphaSignal, Fund, Signal, Urgency};
use crate::queue::SignalQueue;
use crate::registry::FundMetrics;
use crate::scheduler::SkewMonitor;

/// Alerts older than this are dead on arrival.
const MAX_ALERT_AGE: chrono::Duration = chrono::Duration::seconds(300);
const PROCESSED_CAPACITY: usize = 1_000;

const FOLLOWED_ALERT_TYPES: [&str; 3] =
    ["INSIDER_DETECTED", "UNUSUAL_ACTIVITY", "SMART_MONEY_ENTRY"];

const DEFAULT_CONFIDENCE: f64 = 0.6;
const DEFAULT_STRENGTH: f64 = 0.5;

struct AlertState {
    processed: BoundedIdSet,
    last_signal_at: HashMap<String, DateTime<Utc>>,
    last_poll: DateTime<Utc>,
    skew_generation: u64,
}

pub struct AlertFollowerStrategy {
    fund: Arc<Fund>,
    queue: Arc<SignalQueue>,
    analytics: Arc<dyn AnalyticsClient>,
    tob: Arc<TobCache>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FundMetrics>,
    skew: Arc<SkewMonitor>,
    poll_interval: Duration,
    state: Mutex<AlertState>,
}

impl AlertFollowerStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fund: Arc<Fund>,
        queue: Arc<SignalQueue>,
        analytics: Arc<dyn AnalyticsClient>,
        tob: Arc<TobCache>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FundMetrics>,
        skew: Arc<SkewMonitor>,
    ) -> Self {
        let now = clock.now_utc();
        Self {
            fund,
            queue,
            analytics,
            tob,
            clock,
            metrics,
            skew,
            poll_interval: Duration::from_secs(5),
            state: Mutex::new(AlertState {
                processed: BoundedIdSet::new(PROCESSED_CAPACITY),
                last_signal_at: HashMap::new(),
                last_poll: now - MAX_ALERT_AGE,
                skew_generation: 0,
            }),
        }
    }

    /// Build an alpha signal from an alert, or explain why not.
    fn convert(&self, alert: &AlertRow, now: DateTime<Utc>) -> Option<AlphaSignal> {
        let metadata: serde_json::Value = match serde_json::from_str(&alert.metadata) {
            Ok(value) => value,
            Err(e) => {
                warn!(alert = %alert.id, error = %e, "alert metadata is not valid JSON");
                return None;
            }
        };

        let Some(token_id) = metadata.get("token_id").and_then(|v| v.as_str()) else {
            warn!(alert = %alert.id, "alert metadata missing token_id");
            return None;
        };

        // Explicit direction wins; otherwise entries buy and exits sell.
        let action = match metadata.get("direction").and_then(|v| v.as_str()) {
            Some(d) if d.eq_ignore_ascii_case("SELL") => AlphaAction::Sell,
            Some(_) => AlphaAction::Buy,
            None if alert.alert_type.contains("EXIT") => AlphaAction::Sell,
            None => AlphaAction::Buy,
        };

        let confidence = metadata
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_CONFIDENCE)
            .clamp(0.0, 1.0);
        let strength = metadata
            .get("strength")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_STRENGTH)
            .max(0.0);
        let suggested_notional = metadata.get("suggested_notional").and_then(|v| v.as_f64());
        let outcome = metadata
            .get("outcome")
            .and_then(|v| v.as_str())
            .unwrap_or("Yes")
            .to_string();

        // Reference price: alert metadata first, live quote as fallback.
        let price = metadata
            .get("price")
            .and_then(|v| v.as_f64())
            .filter(|p| *p > 0.0 && *p < 1.0)
            .or_else(|| {
                self.tob
                    .get_fresh(token_id, now)
                    .and_then(|tob| tob.mid())
            });
        let Some(price) = price else {
            warn!(alert = %alert.id, token_id, "no reference price for alert, skipping");
            return None;
        };

        Some(AlphaSignal {
            id: format!("alert:{}", alert.id),
            source: format!("alert:{}", alert.alert_type),
            action,
            market_slug: alert.market_slug.clone(),
            token_id: token_id.to_string(),
            outcome,
            confidence,
            strength,
            urgency: Urgency::from_severity(&alert.severity),
            price,
            suggested_notional,
            suggested_fraction: None,
            reason: alert.title.clone(),
            metadata: metadata
                .as_object()
                .map(|m| m.clone().into_iter().collect())
                .unwrap_or_default(),
            detected_at: now,
            expires_at: alert.expires_at.unwrap_or(alert.created_at + MAX_ALERT_AGE),
        })
    }
}

#[async_trait]
impl Strategy for AlertFollowerStrategy {
    fn fund_id(&self) -> &str {
        &self.fund.id
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll(&self) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock().await;

        let generation = self.skew.generation();
        if generation != state.skew_generation {
            state.skew_generation = generation;
            state.last_poll = now - MAX_ALERT_AGE;
        }

        let from = state.last_poll;
        let analytics = self.analytics.clone();
        let alerts = with_retry("active_alerts", || {
            let analytics = analytics.clone();
            async move { analytics.active_alerts(&FOLLOWED_ALERT_TYPES, from, now).await }
        })
        .await;

        let alerts = match alerts {
            Ok(alerts) => alerts,
            Err(_) => {
                FundMetrics::incr(&self.metrics.polls_failed);
                return;
            }
        };

        for alert in &alerts {
            if state.processed.contains(&alert.id) {
                continue;
            }

            let age = now.signed_duration_since(alert.created_at);
            let expired = alert.expires_at.map(|e| e < now).unwrap_or(false);
            if age > MAX_ALERT_AGE || expired {
                state.processed.insert(&alert.id);
                debug!(alert = %alert.id, "alert too old, skipping");
                continue;
            }

            // Cooldown skips do NOT mark processed: the alert gets another
            // look next tick if the market frees up within its lifetime.
            if let Some(last) = state.last_signal_at.get(&alert.market_slug) {
                let elapsed = now.signed_duration_since(*last);
                if elapsed
                    < chrono::Duration::from_std(self.fund.params.cooldown)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60))
                {
                    debug!(alert = %alert.id, market = %alert.market_slug, "market on cooldown");
                    continue;
                }
            }

            if let Some(signal) = self.convert(alert, now) {
                let market = signal.market_slug.clone();
                if self.queue.enqueue(Signal::Alpha(signal), now) {
                    FundMetrics::incr(&self.metrics.signals_emitted);
                    state.last_signal_at.insert(market, now);
                }
            }
            state.processed.insert(&alert.id);
        }

        state.last_poll = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SqliteAnalyticsStore;
    use crate::models::{ExecutionMode, FundCategory, RiskLimits, StrategyParams};
    use chrono::TimeZone;
    use std::sync::atomic::AtomicBool;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn alert_fund() -> Arc<Fund> {
        Arc::new(Fund {
            id: "ALPHA-INSIDER".into(),
            category: FundCategory::Active,
            capital_usd: 10_000.0,
            max_position_pct: 0.10,
            min_trade_usd: 5.0,
            signal_delay: Duration::from_secs(2),
            max_slippage: 0.02,
            execution_mode: ExecutionMode::LimitOnly,
            risk: RiskLimits {
                max_daily_loss_usd: 500.0,
                max_drawdown_pct: 0.2,
                max_open_positions: 10,
                max_market_exposure_usd: 1_000.0,
                kill_switch: Arc::new(AtomicBool::new(false)),
            },
            params: StrategyParams::default(),
            started_at: t0(),
        })
    }

    fn alert(id: &str, market: &str, created_at: DateTime<Utc>) -> AlertRow {
        AlertRow {
            id: id.to_string(),
            alert_type: "INSIDER_DETECTED".into(),
            severity: "HIGH".into(),
            source: "scanner".into(),
            username: None,
            market_slug: market.to_string(),
            title: "insider flow".into(),
            message: "unusual size from tracked wallet".into(),
            metadata: serde_json::json!({
                "token_id": "tok-yes",
                "direction": "BUY",
                "confidence": 0.8,
                "price": 0.45,
            })
            .to_string(),
            created_at,
            expires_at: Some(created_at + chrono::Duration::minutes(10)),
            status: "ACTIVE".into(),
        }
    }

    async fn setup() -> (
        AlertFollowerStrategy,
        Arc<SignalQueue>,
        Arc<SqliteAnalyticsStore>,
        Arc<crate::clock::ManualClock>,
    ) {
        let store = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        let clock = Arc::new(crate::clock::ManualClock::new(t0()));
        let fund = alert_fund();
        let queue = Arc::new(SignalQueue::new(fund.id.clone(), fund.signal_delay));
        let strategy = AlertFollowerStrategy::new(
            fund,
            queue.clone(),
            store.clone(),
            Arc::new(TobCache::new()),
            clock.clone(),
            Arc::new(FundMetrics::default()),
            SkewMonitor::new(clock.clone()),
        );
        (strategy, queue, store, clock)
    }

    #[tokio::test]
    async fn alert_converts_to_alpha_signal() {
        let (strategy, queue, store, clock) = setup().await;
        store.insert_alert(&alert("A1", "m", t0())).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        strategy.poll().await;

        assert_eq!(queue.len(), 1);
        let due = queue.drain_due(clock.now_utc() + chrono::Duration::seconds(5));
        let Signal::Alpha(signal) = &due[0].signal else {
            panic!("expected alpha signal");
        };
        assert_eq!(signal.action, AlphaAction::Buy);
        assert_eq!(signal.urgency, Urgency::High);
        assert!((signal.confidence - 0.8).abs() < 1e-9);
        assert!((signal.price - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cooldown_blocks_second_alert_until_elapsed() {
        let (strategy, queue, store, clock) = setup().await;
        store.insert_alert(&alert("A1", "m", t0())).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        strategy.poll().await;
        assert_eq!(queue.len(), 1);

        // A2 lands 30 s later on the same market: cooldown (60 s) blocks it.
        store
            .insert_alert(&alert("A2", "m", t0() + chrono::Duration::seconds(30)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(30));
        strategy.poll().await;
        assert_eq!(queue.len(), 1);

        // A3 at +70 s clears the cooldown.
        store
            .insert_alert(&alert("A3", "m", t0() + chrono::Duration::seconds(70)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(40));
        strategy.poll().await;
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn stale_alert_marked_processed_and_skipped() {
        let (strategy, queue, store, clock) = setup().await;
        // Created six minutes before now: older than the 300 s window.
        store
            .insert_alert(&alert("OLD", "m", t0() - chrono::Duration::seconds(360)))
            .await
            .unwrap();

        // Widen the poll window to catch the old row.
        strategy.state.lock().await.last_poll = t0() - chrono::Duration::seconds(600);
        clock.advance(chrono::Duration::seconds(1));
        strategy.poll().await;

        assert_eq!(queue.len(), 0);
        assert!(strategy.state.lock().await.processed.contains("OLD"));
    }

    #[tokio::test]
    async fn missing_token_id_is_skipped_but_processed() {
        let (strategy, queue, store, clock) = setup().await;
        let mut bad = alert("BAD", "m", t0());
        bad.metadata = serde_json::json!({ "confidence": 0.9 }).to_string();
        store.insert_alert(&bad).await.unwrap();

        clock.advance(chrono::Duration::seconds(1));
        strategy.poll().await;

        assert_eq!(queue.len(), 0);
        assert!(strategy.state.lock().await.processed.contains("BAD"));
    }
}
