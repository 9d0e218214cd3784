//! Mirror-by-weight strategy: replicate trades from the constituents of a
//! mirror fund's index, scaled by constituent weight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::Strategy;
use crate::analytics::{with_retry, AnalyticsClient};
use crate::clock::Clock;
use crate::index::IndexWeightProvider;
use crate::models::{Fund, Signal, SignalKind, TraderSignal};
use crate::queue::SignalQueue;
use crate::registry::FundMetrics;
use crate::scheduler::SkewMonitor;

/// First tick looks back this far; also the post-skew reset window.
const INITIAL_POLL_LAG: chrono::Duration = chrono::Duration::seconds(10);

struct MirrorState {
    last_poll: DateTime<Utc>,
    per_address_last_seen: HashMap<String, DateTime<Utc>>,
    skew_generation: u64,
}

pub struct MirrorStrategy {
    fund: Arc<Fund>,
    index_name: String,
    queue: Arc<SignalQueue>,
    analytics: Arc<dyn AnalyticsClient>,
    index_provider: Arc<IndexWeightProvider>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FundMetrics>,
    skew: Arc<SkewMonitor>,
    poll_interval: Duration,
    state: Mutex<MirrorState>,
}

impl MirrorStrategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fund: Arc<Fund>,
        queue: Arc<SignalQueue>,
        analytics: Arc<dyn AnalyticsClient>,
        index_provider: Arc<IndexWeightProvider>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FundMetrics>,
        skew: Arc<SkewMonitor>,
    ) -> Self {
        // Mirror funds track the index named after themselves unless the
        // allocation overrides it.
        let index_name = fund.params.index.clone().unwrap_or_else(|| fund.id.clone());
        let now = clock.now_utc();
        Self {
            fund,
            index_name,
            queue,
            analytics,
            index_provider,
            clock,
            metrics,
            skew,
            poll_interval: Duration::from_secs(2),
            state: Mutex::new(MirrorState {
                last_poll: now - INITIAL_POLL_LAG,
                per_address_last_seen: HashMap::new(),
                skew_generation: 0,
            }),
        }
    }
}

#[async_trait]
impl Strategy for MirrorStrategy {
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
            state.last_poll = now - INITIAL_POLL_LAG;
            state.per_address_last_seen.clear();
        }

        let snapshot = self.index_provider.snapshot(&self.index_name, now).await;
        if snapshot.is_empty() {
            return;
        }

        let addresses = snapshot.addresses();
        let from = state.last_poll;
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
                // Highwater mark stays put so the next tick re-covers the window.
                FundMetrics::incr(&self.metrics.polls_failed);
                return;
            }
        };

        for trade in trades {
            let proxy = trade.proxy_address.to_lowercase();
            if let Some(last_seen) = state.per_address_last_seen.get(&proxy) {
                if trade.ts <= *last_seen {
                    FundMetrics::incr(&self.metrics.signals_duplicate);
                    continue;
                }
            }
            state.per_address_last_seen.insert(proxy.clone(), trade.ts);

            let Some(member) = snapshot.lookup(&proxy) else {
                debug!(fund = %self.fund.id, %proxy, "trade from unknown constituent, skipping");
                continue;
            };

            let kind = if trade.side.eq_ignore_ascii_case("BUY") {
                SignalKind::Buy
            } else {
                SignalKind::Sell
            };

            let signal = TraderSignal {
                id: trade.trade_id.clone(),
                username: trade.username.clone(),
                proxy_address: proxy,
                market_slug: trade.market_slug.clone(),
                token_id: trade.token_id.clone(),
                outcome: trade.outcome.clone(),
                kind,
                shares: trade.size,
                price: trade.price,
                notional: trade.notional,
                detected_at: now,
                trader_executed_at: trade.ts,
                trader_weight: member.weight,
                trader_capital: member.estimated_capital_usd,
            };
            if self.queue.enqueue(Signal::Trader(signal), now) {
                FundMetrics::incr(&self.metrics.signals_emitted);
            }
        }

        // Advance the highwater mark only after the query succeeded.
        state.last_poll = now;
    }
}
