//! Edge-ranked follower: maintain a roster of high-edge traders from the ML
//! ranking, mirror their recent trades, and emit exit signals when a
//! followed trader's edge decays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BoundedIdSet, Strategy};
use crate::analytics::{with_retry, AnalyticsClient, EdgeTraderRow, TradeRow};
use crate::clock::Clock;
use crate::models::{AlphaAction, AlphaSignal, Fund, Signal, Urgency, WILDCARD};
use crate::queue::SignalQueue;
use crate::registry::FundMetrics;
use crate::scheduler::SkewMonitor;

const MIN_EDGE: f64 = 70.0;
const MAX_INVERSE_CONFIDENCE: f64 = 0.5;
const ROSTER_LIMIT: usize = 50;
const ROSTER_TTL: chrono::Duration = chrono::Duration::seconds(600);
const EDGE_HISTORY_CAPACITY: usize = 12;
const DECAY_THRESHOLD: f64 = 15.0;
const TRADE_MAX_AGE: chrono::Duration = chrono::Duration::hours(1);
const PROCESSED_CAPACITY: usize = 2_000;
const INITIAL_TRADE_LAG: chrono::Duration = chrono::Duration::seconds(10);
const DECAY_SIGNAL_TTL: chrono::Duration = chrono::Duration::seconds(300);

struct EdgeState {
    roster: HashMap<String, EdgeTraderRow>,
    /// Bounded per-trader (edge, observed-at) history.
    histories: HashMap<String, VecDeque<(f64, DateTime<Utc>)>>,
    processed_trades: BoundedIdSet,
    cooldowns: HashMap<String, DateTime<Utc>>,
    last_trade_poll: DateTime<Utc>,
    skew_generation: u64,
}

pub struct EdgeRankedStrategy {
    fund: Arc<Fund>,
    queue: Arc<SignalQueue>,
    analytics: Arc<dyn AnalyticsClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FundMetrics>,
    skew: Arc<SkewMonitor>,
    poll_interval: Duration,
    state: Mutex<EdgeState>,
}

impl EdgeRankedStrategy {
    pub fn new(
        fund: Arc<Fund>,
        queue: Arc<SignalQueue>,
        analytics: Arc<dyn AnalyticsClient>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FundMetrics>,
        skew: Arc<SkewMonitor>,
    ) -> Self {
        let now = clock.now_utc();
        Self {
            fund,
            queue,
            analytics,
            clock,
            metrics,
            skew,
            poll_interval: Duration::from_secs(10),
            state: Mutex::new(EdgeState {
                roster: HashMap::new(),
                histories: HashMap::new(),
                processed_trades: BoundedIdSet::new(PROCESSED_CAPACITY),
                cooldowns: HashMap::new(),
                last_trade_poll: now - INITIAL_TRADE_LAG,
                skew_generation: 0,
            }),
        }
    }

    /// Record a fresh edge observation; emits an exit signal when the edge
    /// has fallen more than the decay threshold off its tracked peak.
    fn observe_edge(&self, state: &mut EdgeState, row: &EdgeTraderRow, now: DateTime<Utc>) {
        let proxy = row.proxy_address.to_lowercase();
        let history = state.histories.entry(proxy.clone()).or_default();
        if history.len() >= EDGE_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back((row.edge, now));

        // Need a prior observation to speak of decay at all.
        if history.len() < 2 {
            return;
        }
        let peak = history
            .iter()
            .map(|(e, _)| *e)
            .fold(f64::NEG_INFINITY, f64::max);
        let decay = peak - row.edge;
        if decay <= DECAY_THRESHOLD {
            return;
        }

        FundMetrics::incr(&self.metrics.decay_events);
        let confidence = (decay / 30.0).min(0.9);
        info!(
            fund = %self.fund.id,
            trader = %row.username,
            proxy = %proxy,
            peak,
            current = row.edge,
            decay,
            confidence,
            "edge decay detected, emitting exit signal"
        );

        let signal = AlphaSignal {
            id: format!("decay:{}:{}", proxy, now.timestamp_millis()),
            source: proxy.clone(),
            action: AlphaAction::Sell,
            market_slug: WILDCARD.to_string(),
            token_id: WILDCARD.to_string(),
            outcome: WILDCARD.to_string(),
            confidence,
            strength: confidence,
            urgency: Urgency::Medium,
            price: 0.5,
            suggested_notional: None,
            suggested_fraction: None,
            reason: format!("edge decayed {:.0} points from peak {:.0}", decay, peak),
            metadata: HashMap::new(),
            detected_at: now,
            expires_at: now + DECAY_SIGNAL_TTL,
        };
        if self.queue.enqueue(Signal::Alpha(signal), now) {
            FundMetrics::incr(&self.metrics.signals_emitted);
        }

        // Fresh baseline after an exit so the same slide does not refire.
        state.histories.insert(proxy, VecDeque::new());
    }

    fn convert_trade(
        &self,
        trade: &TradeRow,
        trader: &EdgeTraderRow,
        now: DateTime<Utc>,
    ) -> AlphaSignal {
        let confidence = (trader.edge / 100.0).clamp(0.0, 1.0);
        let strength = confidence * (trade.notional / 1_000.0).clamp(0.0, 1.0);

        let age = now.signed_duration_since(trade.ts);
        let urgency = if trader.edge >= 90.0 && age < chrono::Duration::seconds(60) {
            Urgency::High
        } else if trader.edge >= 80.0 && age < chrono::Duration::seconds(300) {
            Urgency::Medium
        } else {
            Urgency::Low
        };

        let action = if trade.side.eq_ignore_ascii_case("SELL") {
            AlphaAction::Sell
        } else {
            AlphaAction::Buy
        };

        AlphaSignal {
            id: format!("edge:{}", trade.trade_id),
            source: trader.proxy_address.to_lowercase(),
            action,
            market_slug: trade.market_slug.clone(),
            token_id: trade.token_id.clone(),
            outcome: trade.outcome.clone(),
            confidence,
            strength,
            urgency,
            price: trade.price,
            // Follow at half the conviction of the source trade.
            suggested_notional: Some(trade.notional * 0.5),
            suggested_fraction: None,
            reason: format!(
                "{} (edge {:.0}, cluster {})",
                trade.side, trader.edge, trader.cluster
            ),
            metadata: HashMap::new(),
            detected_at: now,
            expires_at: now + chrono::Duration::seconds(300),
        }
    }
}

#[async_trait]
impl Strategy for EdgeRankedStrategy {
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
            state.last_trade_poll = now - INITIAL_TRADE_LAG;
        }

        // 1. Refresh the roster. A failed refresh keeps the cached roster;
        //    the trade fan-in below still runs.
        let analytics = self.analytics.clone();
        match with_retry("high_edge_traders", || {
            let analytics = analytics.clone();
            async move {
                analytics
                    .high_edge_traders(MIN_EDGE, MAX_INVERSE_CONFIDENCE, ROSTER_LIMIT)
                    .await
            }
        })
        .await
        {
            Ok(rows) => {
                for row in rows {
                    self.observe_edge(&mut state, &row, now);
                    let mut entry = row.clone();
                    entry.updated_at = now;
                    state.roster.insert(row.proxy_address.to_lowercase(), entry);
                }
            }
            Err(_) => {
                FundMetrics::incr(&self.metrics.polls_failed);
            }
        }

        // 2. Evict roster entries that have gone stale.
        let eviction_cutoff = now - ROSTER_TTL * 2;
        state.roster.retain(|_, t| t.updated_at >= eviction_cutoff);

        if state.roster.is_empty() {
            return;
        }

        // 3. Trade fan-in across the roster.
        let addresses: Vec<String> = state.roster.keys().cloned().collect();
        let from = state.last_trade_poll;
        let analytics = self.analytics.clone();
        let trades = with_retry("trades_for_addresses", || {
            let analytics = analytics.clone();
            let addresses = addresses.clone();
            async move { analytics.trades_for_addresses(&addresses, from, now).await }
        })
        .await;

        let trades = match trades {
            Ok(trades) => trades,
            Err(_) => {
                FundMetrics::incr(&self.metrics.polls_failed);
                return;
            }
        };

        for trade in trades {
            if state.processed_trades.contains(&trade.trade_id) {
                continue;
            }
            if now.signed_duration_since(trade.ts) > TRADE_MAX_AGE {
                state.processed_trades.insert(&trade.trade_id);
                continue;
            }
            if let Some(last) = state.cooldowns.get(&trade.market_slug) {
                let elapsed = now.signed_duration_since(*last);
                if elapsed
                    < chrono::Duration::from_std(self.fund.params.cooldown)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60))
                {
                    debug!(market = %trade.market_slug, "market on cooldown, trade deferred");
                    continue;
                }
            }

            let Some(trader) = state.roster.get(&trade.proxy_address.to_lowercase()).cloned()
            else {
                continue;
            };

            let signal = self.convert_trade(&trade, &trader, now);
            if self.queue.enqueue(Signal::Alpha(signal), now) {
                FundMetrics::incr(&self.metrics.signals_emitted);
                state.cooldowns.insert(trade.market_slug.clone(), now);
            }
            state.processed_trades.insert(&trade.trade_id);
        }

        state.last_trade_poll = now;
    }
}
