//! Complete-set arbitrage: when YES-ask + NO-ask < 1 - epsilon on a binary
//! market, buy both legs. Each pair pays 1.0 at resolution regardless of
//! outcome, so a total cost under 1.0 locks the difference in, up to fees
//! and unfilled legs; hence the matching-size liquidity check and the
//! shared expiry on both signals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BoundedIdSet, Strategy};
use crate::analytics::{with_retry, AnalyticsClient, BinaryMarketRow};
use crate::clock::Clock;
use crate::executor::FundExecutor;
use crate::marketdata::{TobCache, TobFeed};
use crate::models::{AlphaAction, AlphaSignal, Fund, Signal, TopOfBook, Urgency};
use crate::queue::SignalQueue;
use crate::registry::FundMetrics;

const MAX_ACTIVE_ARBS: usize = 5;
const MIN_EDGE: f64 = 0.02;
/// Minimum dollar depth resting at each best ask.
const MIN_ASK_NOTIONAL_USD: f64 = 50.0;
const MIN_PER_SIDE_USD: f64 = 10.0;
const SIGNAL_TTL: chrono::Duration = chrono::Duration::seconds(60);
const RECENT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
struct ActiveArb {
    arb_id: String,
    yes_token: String,
    no_token: String,
    entered_at: DateTime<Utc>,
    end_time: DateTime<Utc>,
    per_side_notional: f64,
}

struct ArbState {
    active: HashMap<String, ActiveArb>,
    recently_processed: BoundedIdSet,
}

pub struct CompleteSetStrategy {
    fund: Arc<Fund>,
    queue: Arc<SignalQueue>,
    analytics: Arc<dyn AnalyticsClient>,
    tob: Arc<TobCache>,
    feed: Option<Arc<TobFeed>>,
    executor: Arc<FundExecutor>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FundMetrics>,
    poll_interval: Duration,
    state: Mutex<ArbState>,
}

impl CompleteSetStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fund: Arc<Fund>,
        queue: Arc<SignalQueue>,
        analytics: Arc<dyn AnalyticsClient>,
        tob: Arc<TobCache>,
        feed: Option<Arc<TobFeed>>,
        executor: Arc<FundExecutor>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FundMetrics>,
    ) -> Self {
        Self {
            fund,
            queue,
            analytics,
            tob,
            feed,
            executor,
            clock,
            metrics,
            poll_interval: Duration::from_secs(2),
            state: Mutex::new(ArbState {
                active: HashMap::new(),
                recently_processed: BoundedIdSet::new(RECENT_CAPACITY),
            }),
        }
    }

    pub fn active_arbs(&self) -> usize {
        // Poll loop and status readers only; maintenance holds the lock.
        self.state.try_lock().map(|s| s.active.len()).unwrap_or(0)
    }

    fn leg_signal(
        &self,
        market: &BinaryMarketRow,
        arb_id: &str,
        leg: &str,
        token_id: &str,
        ask: f64,
        per_side_notional: f64,
        confidence: f64,
        edge: f64,
        now: DateTime<Utc>,
    ) -> AlphaSignal {
        let mut metadata = HashMap::new();
        metadata.insert(
            "arb_id".to_string(),
            serde_json::Value::String(arb_id.to_string()),
        );
        metadata.insert("leg".to_string(), serde_json::Value::String(leg.to_string()));
        metadata.insert(
            "edge".to_string(),
            serde_json::Value::from(edge),
        );

        AlphaSignal {
            id: format!("arb:{arb_id}:{leg}"),
            source: "arb".to_string(),
            action: AlphaAction::Buy,
            market_slug: market.slug.clone(),
            token_id: token_id.to_string(),
            outcome: if leg == "YES" { "Yes" } else { "No" }.to_string(),
            confidence,
            strength: 1.0,
            urgency: Urgency::High,
            price: ask,
            suggested_notional: Some(per_side_notional),
            suggested_fraction: None,
            reason: format!("complete-set edge {:.3} on {}", edge, market.slug),
            metadata,
            detected_at: now,
            expires_at: now + SIGNAL_TTL,
        }
    }

    fn evaluate(
        &self,
        market: &BinaryMarketRow,
        yes: &TopOfBook,
        no: &TopOfBook,
    ) -> Option<(f64, f64, f64)> {
        if yes.ask <= 0.0 || no.ask <= 0.0 {
            return None;
        }
        let edge = 1.0 - (yes.ask + no.ask);
        if edge < MIN_EDGE {
            debug!(market = %market.slug, edge, "edge below threshold");
            return None;
        }

        let per_side = (self.fund.params.max_arb_notional_usd / 2.0)
            .min(0.5 * yes.ask_notional().min(no.ask_notional()));
        if per_side < MIN_PER_SIDE_USD {
            debug!(market = %market.slug, per_side, "per-side size too small");
            return None;
        }

        let confidence = (0.5 + (edge / 0.03) * 0.45).clamp(0.0, 0.95);
        Some((edge, per_side, confidence))
    }
}

#[async_trait]
impl Strategy for CompleteSetStrategy {
    fn fund_id(&self) -> &str {
        &self.fund.id
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn maintenance_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    async fn poll(&self) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock().await;
        if state.active.len() >= MAX_ACTIVE_ARBS {
            return;
        }

        let analytics = self.analytics.clone();
        let markets = match with_retry("binary_markets", || {
            let analytics = analytics.clone();
            async move { analytics.binary_markets(now).await }
        })
        .await
        {
            Ok(markets) => markets,
            Err(_) => {
                FundMetrics::incr(&self.metrics.polls_failed);
                return;
            }
        };

        for market in &markets {
            if state.active.len() >= MAX_ACTIVE_ARBS {
                break;
            }
            if state.active.contains_key(&market.slug)
                || state.recently_processed.contains(&market.slug)
            {
                continue;
            }

            if let Some(feed) = &self.feed {
                feed.ensure_subscribed(&market.yes_token);
                feed.ensure_subscribed(&market.no_token);
            }

            // Stale or missing books leave the market unmarked: the quotes
            // may be fresh on a later pass.
            let Some(yes) = self.tob.get_fresh(&market.yes_token, now) else {
                continue;
            };
            let Some(no) = self.tob.get_fresh(&market.no_token, now) else {
                continue;
            };
            if yes.ask_notional() < MIN_ASK_NOTIONAL_USD
                || no.ask_notional() < MIN_ASK_NOTIONAL_USD
            {
                continue;
            }

            let Some((edge, per_side, confidence)) = self.evaluate(market, &yes, &no) else {
                // Evaluated against fresh books and found wanting.
                state.recently_processed.insert(&market.slug);
                continue;
            };

            let arb_id = Uuid::new_v4().to_string();
            info!(
                fund = %self.fund.id,
                market = %market.slug,
                edge,
                per_side,
                confidence,
                arb_id = %arb_id,
                "complete-set opportunity, enqueueing pair"
            );

            let yes_leg = self.leg_signal(
                market, &arb_id, "YES", &market.yes_token, yes.ask, per_side, confidence, edge,
                now,
            );
            let no_leg = self.leg_signal(
                market, &arb_id, "NO", &market.no_token, no.ask, per_side, confidence, edge, now,
            );
            if self.queue.enqueue(Signal::Alpha(yes_leg), now) {
                FundMetrics::incr(&self.metrics.signals_emitted);
            }
            if self.queue.enqueue(Signal::Alpha(no_leg), now) {
                FundMetrics::incr(&self.metrics.signals_emitted);
            }

            state.active.insert(
                market.slug.clone(),
                ActiveArb {
                    arb_id,
                    yes_token: market.yes_token.clone(),
                    no_token: market.no_token.clone(),
                    entered_at: now,
                    end_time: market.end_time,
                    per_side_notional: per_side,
                },
            );
            state.recently_processed.insert(&market.slug);
        }
    }

    /// Resolution housekeeping: markets whose end-time has passed settle at
    /// 1.00 per matched pair and leave the active set.
    async fn maintenance(&self) {
        let now = self.clock.now_utc();
        let mut state = self.state.lock().await;
        let resolved: Vec<(String, ActiveArb)> = state
            .active
            .iter()
            .filter(|(_, arb)| arb.end_time <= now)
            .map(|(slug, arb)| (slug.clone(), arb.clone()))
            .collect();

        for (slug, arb) in resolved {
            let realized =
                self.executor
                    .settle_complete_set(&slug, &arb.yes_token, &arb.no_token);
            info!(
                fund = %self.fund.id,
                market = %slug,
                arb_id = %arb.arb_id,
                held_for_secs = now.signed_duration_since(arb.entered_at).num_seconds(),
                per_side = arb.per_side_notional,
                realized,
                "arb resolved"
            );
            state.active.remove(&slug);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SqliteAnalyticsStore;
    use crate::gateway::PaperGateway;
    use crate::models::{ExecutionMode, FundCategory, RiskLimits, StrategyParams};
    use crate::registry::FundRegistry;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicBool;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn arb_fund() -> Arc<Fund> {
        Arc::new(Fund {
            id: "ALPHA-ARB".into(),
            category: FundCategory::Active,
            capital_usd: 10_000.0,
            max_position_pct: 0.10,
            min_trade_usd: 1.0,
            signal_delay: Duration::ZERO,
            max_slippage: 0.0,
            execution_mode: ExecutionMode::LimitOnly,
            risk: RiskLimits {
                max_daily_loss_usd: 500.0,
                max_drawdown_pct: 0.2,
                max_open_positions: 20,
                max_market_exposure_usd: 1_000.0,
                kill_switch: Arc::new(AtomicBool::new(false)),
            },
            params: StrategyParams {
                max_arb_notional_usd: 100.0,
                min_confidence: 0.5,
                min_strength: 0.2,
                ..StrategyParams::default()
            },
            started_at: t0(),
        })
    }

    struct Harness {
        strategy: CompleteSetStrategy,
        queue: Arc<SignalQueue>,
        store: Arc<SqliteAnalyticsStore>,
        tob: Arc<TobCache>,
        clock: Arc<crate::clock::ManualClock>,
        executor: Arc<FundExecutor>,
        gateway: Arc<PaperGateway>,
    }

    async fn setup() -> Harness {
        let store = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        let clock = Arc::new(crate::clock::ManualClock::new(t0()));
        let fund = arb_fund();
        let queue = Arc::new(SignalQueue::new(fund.id.clone(), fund.signal_delay));
        let tob = Arc::new(TobCache::new());
        let registry = FundRegistry::new();
        let fund_state = registry.register(fund.clone());
        let gateway = Arc::new(PaperGateway::new(10_000.0));
        let executor = FundExecutor::new(
            fund.clone(),
            queue.clone(),
            gateway.clone(),
            store.clone(),
            tob.clone(),
            clock.clone(),
            fund_state.clone(),
        );
        let strategy = CompleteSetStrategy::new(
            fund,
            queue.clone(),
            store.clone(),
            tob.clone(),
            None,
            executor.clone(),
            clock.clone(),
            fund_state.metrics.clone(),
        );
        Harness {
            strategy,
            queue,
            store,
            tob,
            clock,
            executor,
            gateway,
        }
    }

    fn tob(token: &str, ask: f64, ask_size: f64, updated_at: DateTime<Utc>) -> TopOfBook {
        TopOfBook {
            token_id: token.to_string(),
            bid: (ask - 0.02).max(0.01),
            ask,
            bid_size: ask_size,
            ask_size,
            updated_at,
        }
    }

    #[tokio::test]
    async fn qualifying_market_enqueues_matched_pair() {
        let h = setup().await;
        h.store
            .upsert_market("m", &["yes", "no"], t0() + chrono::Duration::days(1), true, 1_000.0)
            .await
            .unwrap();
        // YES ask 0.48 x 200 shares ($96 depth), NO ask 0.50 x 150 ($75).
        h.tob.apply(tob("yes", 0.48, 200.0, t0()));
        h.tob.apply(tob("no", 0.50, 150.0, t0()));

        h.strategy.poll().await;

        // per-side = min(100/2, 0.5 * min(96, 75)) = 37.5.
        let due = h.queue.drain_due(t0());
        assert_eq!(due.len(), 2);
        let Signal::Alpha(yes_leg) = &due[0].signal else {
            panic!("expected alpha signal");
        };
        let Signal::Alpha(no_leg) = &due[1].signal else {
            panic!("expected alpha signal");
        };
        assert_eq!(yes_leg.suggested_notional, Some(37.5));
        assert_eq!(no_leg.suggested_notional, Some(37.5));
        assert!((yes_leg.confidence - 0.8).abs() < 1e-9);
        assert_eq!(yes_leg.urgency, Urgency::High);
        // Both legs share the arb id for downstream joins.
        assert_eq!(yes_leg.metadata.get("arb_id"), no_leg.metadata.get("arb_id"));
        assert_eq!(h.strategy.active_arbs(), 1);
    }

    #[tokio::test]
    async fn stale_books_are_skipped_without_marking() {
        let h = setup().await;
        h.store
            .upsert_market("m", &["yes", "no"], t0() + chrono::Duration::days(1), true, 1_000.0)
            .await
            .unwrap();
        // Both snapshots are older than the 5 s freshness window.
        h.tob
            .apply(tob("yes", 0.48, 200.0, t0() - chrono::Duration::seconds(10)));
        h.tob
            .apply(tob("no", 0.50, 150.0, t0() - chrono::Duration::seconds(20)));

        h.strategy.poll().await;
        assert_eq!(h.queue.len(), 0);

        // Fresh books on the next pass qualify: no recently-processed mark.
        h.clock.advance(chrono::Duration::seconds(2));
        let now = h.clock.now_utc();
        h.tob.apply(tob("yes", 0.48, 200.0, now));
        h.tob.apply(tob("no", 0.50, 150.0, now));
        h.strategy.poll().await;
        assert_eq!(h.queue.len(), 2);
    }

    #[tokio::test]
    async fn thin_edge_is_marked_and_not_revisited() {
        let h = setup().await;
        h.store
            .upsert_market("m", &["yes", "no"], t0() + chrono::Duration::days(1), true, 1_000.0)
            .await
            .unwrap();
        // 0.50 + 0.49 = 0.99: edge 0.01 below the 0.02 floor.
        h.tob.apply(tob("yes", 0.50, 200.0, t0()));
        h.tob.apply(tob("no", 0.49, 200.0, t0()));

        h.strategy.poll().await;
        assert_eq!(h.queue.len(), 0);
        assert!(h
            .strategy
            .state
            .lock()
            .await
            .recently_processed
            .contains("m"));
    }

    #[tokio::test]
    async fn active_arb_cap_stops_new_entries() {
        let h = setup().await;
        for i in 0..7 {
            let slug = format!("m{i}");
            h.store
                .upsert_market(
                    &slug,
                    &[&format!("yes{i}"), &format!("no{i}")],
                    t0() + chrono::Duration::days(1),
                    true,
                    1_000.0 - i as f64,
                )
                .await
                .unwrap();
            h.tob.apply(tob(&format!("yes{i}"), 0.47, 500.0, t0()));
            h.tob.apply(tob(&format!("no{i}"), 0.50, 500.0, t0()));
        }

        h.strategy.poll().await;
        assert_eq!(h.strategy.active_arbs(), MAX_ACTIVE_ARBS);
        assert_eq!(h.queue.len(), MAX_ACTIVE_ARBS * 2);
    }

    #[tokio::test]
    async fn maintenance_settles_resolved_pairs() {
        let h = setup().await;
        h.store
            .upsert_market("m", &["yes", "no"], t0() + chrono::Duration::hours(1), true, 1_000.0)
            .await
            .unwrap();
        h.tob.apply(tob("yes", 0.48, 500.0, t0()));
        h.tob.apply(tob("no", 0.50, 500.0, t0()));

        h.strategy.poll().await;
        // Execute both legs through the real executor.
        let executed = h.executor.process_due().await;
        assert_eq!(executed, 2);
        assert_eq!(h.gateway.submitted_count(), 2);

        // Before resolution nothing settles.
        h.strategy.maintenance().await;
        assert_eq!(h.strategy.active_arbs(), 1);

        // Past the market end time the pair settles at 1.00.
        h.clock.advance(chrono::Duration::hours(2));
        h.strategy.maintenance().await;
        assert_eq!(h.strategy.active_arbs(), 0);
    }
}
