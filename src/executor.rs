//! Execution coordinator: drains a fund's signal queue, sizes each signal,
//! derives the limit price, submits through the gateway, and maintains the
//! fund's position map and daily counters.
//!
//! One executor per fund, driven by the 100 ms queue-drain tick. It is the
//! single writer of the fund's position map; failures are local to the
//! signal being processed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsClient;
use crate::clock::Clock;
use crate::error::{GatewayError, RejectReason};
use crate::gateway::{LimitOrderRequest, OrderGateway};
use crate::marketdata::TobCache;
use crate::models::{
    AlphaSignal, ExecutionMode, ExecutionRecord, Fund, FundPosition, PendingOrder, Side, Signal,
    Urgency,
};
use crate::queue::{QueuedSignal, SignalQueue};
use crate::registry::{FundMetrics, FundState};
use crate::sizing::{round_price, round_shares, size_signal, DailyCounters, SizingContext, SizingOutcome};

/// Residual below this is treated as a closed position.
const SHARE_EPSILON: f64 = 1e-9;

pub struct FundExecutor {
    fund: Arc<Fund>,
    queue: Arc<SignalQueue>,
    gateway: Arc<dyn OrderGateway>,
    analytics: Arc<dyn AnalyticsClient>,
    tob: Arc<TobCache>,
    clock: Arc<dyn Clock>,
    state: Arc<FundState>,
    pending: Mutex<HashMap<String, PendingOrder>>,
    daily: Mutex<DailyCounters>,
}

impl FundExecutor {
    pub fn new(
        fund: Arc<Fund>,
        queue: Arc<SignalQueue>,
        gateway: Arc<dyn OrderGateway>,
        analytics: Arc<dyn AnalyticsClient>,
        tob: Arc<TobCache>,
        clock: Arc<dyn Clock>,
        state: Arc<FundState>,
    ) -> Arc<Self> {
        let now = clock.now_utc();
        Arc::new(Self {
            fund,
            queue,
            gateway,
            analytics,
            tob,
            clock,
            state,
            pending: Mutex::new(HashMap::new()),
            daily: Mutex::new(DailyCounters::new(now)),
        })
    }

    pub fn fund(&self) -> &Arc<Fund> {
        &self.fund
    }

    /// Queue-drain tick body. Processes every due signal in FIFO order.
    pub async fn process_due(&self) -> usize {
        let now = self.clock.now_utc();
        let due = self.queue.drain_due(now);
        let mut processed = 0;
        for queued in due {
            self.handle_signal(queued).await;
            processed += 1;
        }
        self.publish_counters();
        processed
    }

    async fn handle_signal(&self, queued: QueuedSignal) {
        let now = self.clock.now_utc();
        self.daily.lock().roll(now);

        if let Signal::Alpha(alpha) = &queued.signal {
            if alpha.is_wildcard() {
                self.handle_wildcard_exit(alpha).await;
                return;
            }
        }

        let ctx = self.sizing_context(queued.signal.token_id(), now);
        match size_signal(&self.fund, &queued.signal, &ctx) {
            SizingOutcome::Rejected(reason) => {
                FundMetrics::incr(&self.state.metrics.signals_filtered);
                debug!(
                    fund = %self.fund.id,
                    signal = queued.signal.id(),
                    reason = reason.as_str(),
                    "signal filtered"
                );
            }
            SizingOutcome::Sized {
                shares,
                reference_price,
            } => {
                self.submit(&queued.signal, shares, reference_price).await;
            }
        }
    }

    fn sizing_context(&self, token_id: &str, now: DateTime<Utc>) -> SizingContext {
        let positions = self.state.positions.read();
        let existing = positions.get(token_id);
        SizingContext {
            now,
            daily: self.daily.lock().clone(),
            open_positions: positions.len(),
            pending_orders: self.pending.lock().len(),
            existing_token_exposure_usd: existing.map(|p| p.notional()).unwrap_or(0.0),
            holds_token: existing.is_some(),
        }
    }

    /// Submit a sized order and, on acknowledgement, apply the fill to the
    /// position map and persist the execution record. Persistence failure
    /// never reverts the in-memory update.
    async fn submit(&self, signal: &Signal, shares: f64, reference_price: f64) -> bool {
        let Some(side) = signal.side() else {
            // HOLD actions are rejected by sizing; belt and braces.
            return false;
        };
        let limit_price = self.limit_price(reference_price, side, signal.urgency());

        let client_order_id = Uuid::new_v4().to_string();
        let request = LimitOrderRequest {
            client_order_id: client_order_id.clone(),
            token_id: signal.token_id().to_string(),
            side,
            price: limit_price,
            shares,
        };

        let now = self.clock.now_utc();
        self.pending.lock().insert(
            client_order_id.clone(),
            PendingOrder {
                order_id: client_order_id.clone(),
                signal_id: signal.id().to_string(),
                side,
                shares,
                limit_price,
                submitted_at: now,
            },
        );

        let mut submitted_price = limit_price;
        let mut result = self.gateway.place_limit_order(&request).await;

        // Limit-then-market: one aggressive re-quote after a deterministic
        // rejection (price no longer marketable). Transients stay terminal.
        if self.fund.execution_mode == ExecutionMode::LimitThenMarket {
            if let Err(GatewayError::Rejected(ref reason)) = result {
                let crossing = self.limit_price(reference_price, side, Urgency::Critical);
                if (crossing - limit_price).abs() > f64::EPSILON {
                    debug!(
                        fund = %self.fund.id,
                        signal = signal.id(),
                        %reason,
                        "limit rejected, re-quoting aggressively"
                    );
                    let mut retry = request.clone();
                    retry.price = crossing;
                    submitted_price = crossing;
                    result = self.gateway.place_limit_order(&retry).await;
                }
            }
        }

        self.pending.lock().remove(&client_order_id);

        let ack = match result {
            Ok(ack) => ack,
            Err(GatewayError::Rejected(reason)) => {
                FundMetrics::incr(&self.state.metrics.orders_failed);
                FundMetrics::incr(&self.state.metrics.orders_rejected);
                warn!(
                    fund = %self.fund.id,
                    signal = signal.id(),
                    %reason,
                    "order rejected by gateway"
                );
                return false;
            }
            Err(GatewayError::Transient(reason)) => {
                // Terminal for this signal: no retry by default.
                FundMetrics::incr(&self.state.metrics.orders_failed);
                warn!(
                    fund = %self.fund.id,
                    signal = signal.id(),
                    %reason,
                    "gateway transient failure, signal dropped"
                );
                return false;
            }
        };

        FundMetrics::incr(&self.state.metrics.orders_submitted);

        let executed_at = self.clock.now_utc();
        // Limit orders are assumed filled at the limit; the ack carries no
        // fill price on this venue.
        let effective_price = submitted_price;
        match side {
            Side::Buy => self.apply_buy(signal, shares, effective_price, executed_at),
            Side::Sell => self.apply_sell(signal, shares, effective_price, executed_at),
        }

        {
            let mut daily = self.daily.lock();
            daily.record_execution(shares * effective_price);
        }
        FundMetrics::incr(&self.state.metrics.signals_executed);

        let record = ExecutionRecord {
            signal_id: signal.id().to_string(),
            fund_id: self.fund.id.clone(),
            trader_username: signal.trader_username().to_string(),
            market_slug: signal.market_slug().to_string(),
            token_id: signal.token_id().to_string(),
            outcome: signal.outcome().to_string(),
            side,
            trader_shares: match signal {
                Signal::Trader(t) => t.shares,
                Signal::Alpha(_) => shares,
            },
            fund_shares: shares,
            execution_price: effective_price,
            order_id: ack.order_id,
            detected_at: match signal {
                Signal::Trader(t) => t.detected_at,
                Signal::Alpha(a) => a.detected_at,
            },
            executed_at,
        };
        if let Err(e) = self.analytics.insert_execution(&record).await {
            FundMetrics::incr(&self.state.metrics.persist_failures);
            warn!(fund = %self.fund.id, signal = %record.signal_id, error = %e, "execution persistence failed");
        }

        self.publish_counters();
        true
    }

    fn limit_price(&self, reference: f64, side: Side, urgency: Urgency) -> f64 {
        // Market-only funds always cross with the full slippage allowance.
        let multiplier = match self.fund.execution_mode {
            ExecutionMode::MarketOnly => Urgency::Critical.slippage_multiplier(),
            _ => urgency.slippage_multiplier(),
        };
        let offset = self.fund.max_slippage * multiplier;
        let raw = match side {
            Side::Buy => reference * (1.0 + offset),
            Side::Sell => reference * (1.0 - offset),
        };
        round_price(raw, side)
    }

    fn apply_buy(&self, signal: &Signal, shares: f64, price: f64, now: DateTime<Utc>) {
        let mut positions = self.state.positions.write();
        match positions.get_mut(signal.token_id()) {
            Some(position) => {
                let total = position.shares + shares;
                position.avg_cost =
                    (position.shares * position.avg_cost + shares * price) / total;
                position.shares = total;
                position.last_updated_at = now;
            }
            None => {
                positions.insert(
                    signal.token_id().to_string(),
                    FundPosition {
                        id: Uuid::new_v4().to_string(),
                        market_slug: signal.market_slug().to_string(),
                        token_id: signal.token_id().to_string(),
                        outcome: signal.outcome().to_string(),
                        shares,
                        avg_cost: price,
                        realized_pnl: 0.0,
                        opened_at: now,
                        last_updated_at: now,
                        signal_id: signal.id().to_string(),
                        source_tag: Some(signal.source_tag().to_string()),
                    },
                );
            }
        }
    }

    fn apply_sell(&self, signal: &Signal, shares: f64, price: f64, now: DateTime<Utc>) {
        let mut positions = self.state.positions.write();
        let Some(position) = positions.get_mut(signal.token_id()) else {
            FundMetrics::incr(&self.state.metrics.oversell_clamps);
            warn!(
                fund = %self.fund.id,
                token = signal.token_id(),
                shares,
                "OVERSELL: sell against no position, clamped to zero"
            );
            return;
        };

        let mut sell_shares = shares;
        if sell_shares > position.shares + SHARE_EPSILON {
            FundMetrics::incr(&self.state.metrics.oversell_clamps);
            warn!(
                fund = %self.fund.id,
                token = signal.token_id(),
                requested = shares,
                held = position.shares,
                "OVERSELL: clamping to held shares"
            );
            sell_shares = position.shares;
        }

        let realized = sell_shares * (price - position.avg_cost);
        position.shares -= sell_shares;
        position.realized_pnl += realized;
        position.last_updated_at = now;

        if position.shares <= SHARE_EPSILON {
            positions.remove(signal.token_id());
        }
        drop(positions);

        self.state.add_realized_pnl(realized);
        self.daily.lock().record_pnl(realized);
    }

    /// Wildcard decay exit: materialise one SELL per open position that is
    /// attributable to the decayed trader, marked to the live bid. Positions
    /// without a fresh quote are left alone and retried by a later signal.
    async fn handle_wildcard_exit(&self, alpha: &AlphaSignal) {
        if self.fund.risk.kill_switched() {
            FundMetrics::incr(&self.state.metrics.signals_filtered);
            debug!(
                fund = %self.fund.id,
                signal = %alpha.id,
                reason = RejectReason::KillSwitch.as_str(),
                "wildcard exit filtered"
            );
            return;
        }

        let targets: Vec<FundPosition> = {
            let positions = self.state.positions.read();
            positions
                .values()
                .filter(|p| p.source_tag.as_deref() == Some(alpha.source.as_str()))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            debug!(
                fund = %self.fund.id,
                source = %alpha.source,
                "decay exit matched no positions"
            );
            return;
        }

        info!(
            fund = %self.fund.id,
            source = %alpha.source,
            positions = targets.len(),
            confidence = alpha.confidence,
            "materialising decay exits"
        );

        let now = self.clock.now_utc();
        for position in targets {
            let Some(tob) = self.tob.get_fresh(&position.token_id, now) else {
                warn!(
                    fund = %self.fund.id,
                    token = %position.token_id,
                    "no fresh quote for decay exit, skipping position"
                );
                continue;
            };
            if tob.bid <= 0.0 {
                continue;
            }

            let exit = Signal::Alpha(AlphaSignal {
                id: format!("{}:{}", alpha.id, position.token_id),
                source: alpha.source.clone(),
                action: crate::models::AlphaAction::Sell,
                market_slug: position.market_slug.clone(),
                token_id: position.token_id.clone(),
                outcome: position.outcome.clone(),
                confidence: alpha.confidence,
                strength: alpha.strength,
                urgency: alpha.urgency,
                price: tob.bid,
                suggested_notional: None,
                suggested_fraction: None,
                reason: alpha.reason.clone(),
                metadata: alpha.metadata.clone(),
                detected_at: alpha.detected_at,
                expires_at: alpha.expires_at,
            });
            let shares = round_shares(position.shares);
            if self.submit(&exit, shares, tob.bid).await {
                FundMetrics::incr(&self.state.metrics.wildcard_exits);
            }
        }
    }

    /// Settle a resolved complete-set pair: matched YES/NO shares pay 1.0
    /// per pair; both legs leave the position map. Returns the realized
    /// delta credited to the fund.
    pub fn settle_complete_set(&self, market_slug: &str, yes_token: &str, no_token: &str) -> f64 {
        let mut positions = self.state.positions.write();
        let yes = positions.remove(yes_token);
        let no = positions.remove(no_token);
        drop(positions);

        let (yes, no) = match (yes, no) {
            (Some(yes), Some(no)) => (yes, no),
            (one_leg, other_leg) => {
                // A leg never filled. The surviving leg has no matched pair;
                // write its cost off rather than carrying a dead position.
                let written_off: f64 = one_leg
                    .iter()
                    .chain(other_leg.iter())
                    .map(|p| p.notional())
                    .sum();
                if written_off > 0.0 {
                    warn!(
                        fund = %self.fund.id,
                        market_slug,
                        written_off,
                        "complete-set settle with missing leg, writing off"
                    );
                    self.state.add_realized_pnl(-written_off);
                    self.daily.lock().record_pnl(-written_off);
                }
                return -written_off;
            }
        };

        let pairs = yes.shares.min(no.shares);
        let cost = yes.notional() + no.notional();
        let realized = pairs * 1.0 - cost;

        info!(
            fund = %self.fund.id,
            market_slug,
            pairs,
            cost,
            realized,
            "complete-set pair settled"
        );
        self.state.add_realized_pnl(realized);
        self.daily.lock().record_pnl(realized);
        self.publish_counters();
        realized
    }

    /// Mark open positions against the freshest quote available.
    pub fn unrealized_pnl(&self) -> f64 {
        let now = self.clock.now_utc();
        let positions = self.state.positions.read();
        positions
            .values()
            .map(|p| {
                let mark = self
                    .tob
                    .get_fresh(&p.token_id, now)
                    .and_then(|tob| tob.mid())
                    .unwrap_or(p.avg_cost);
                p.shares * (mark - p.avg_cost)
            })
            .sum()
    }

    fn publish_counters(&self) {
        let daily = self.daily.lock();
        self.state.report_daily(daily.trades as u64, daily.notional_usd);
        drop(daily);
        self.state.report_pending_signals(self.queue.len() as u64);
    }
}

