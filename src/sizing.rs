//! Sizing & risk engine shared by all fund variants.
//!
//! Pure decision logic: the executor supplies a context snapshot (daily
//! counters, open/pending counts, current token exposure) and gets back
//! either a sized order or a rejection reason. Checks run in a fixed order
//! so the first binding limit names the rejection.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::RejectReason;
use crate::models::{AlphaSignal, Fund, Side, Signal, TraderSignal};

/// Shares round to 2 decimals toward zero: never order more than sized.
pub fn round_shares(shares: f64) -> f64 {
    (shares * 100.0).trunc() / 100.0
}

/// Prices round to 4 decimals, away from the trader: up for buys, down for
/// sells, clamped inside the (0, 1) band the venue accepts.
pub fn round_price(price: f64, side: Side) -> f64 {
    let scaled = price * 10_000.0;
    let rounded = match side {
        Side::Buy => scaled.ceil(),
        Side::Sell => scaled.floor(),
    };
    (rounded / 10_000.0).clamp(0.0001, 0.9999)
}

/// Daily trading counters, reset at UTC midnight on first observation of a
/// new date. Owned by the fund's executor (single consumer).
#[derive(Debug, Clone)]
pub struct DailyCounters {
    pub date: NaiveDate,
    pub trades: u32,
    pub notional_usd: f64,
    pub realized_pnl: f64,
}

impl DailyCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            date: now.date_naive(),
            trades: 0,
            notional_usd: 0.0,
            realized_pnl: 0.0,
        }
    }

    /// Reset counters if `now` has crossed into a new UTC date.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.date {
            tracing::debug!(from = %self.date, to = %today, "daily counters reset");
            *self = Self::new(now);
        }
    }

    pub fn record_execution(&mut self, notional_usd: f64) {
        self.trades += 1;
        self.notional_usd += notional_usd;
    }

    pub fn record_pnl(&mut self, delta: f64) {
        self.realized_pnl += delta;
    }
}

/// Snapshot of the executor-owned state the sizing decision needs.
#[derive(Debug, Clone)]
pub struct SizingContext {
    pub now: DateTime<Utc>,
    pub daily: DailyCounters,
    pub open_positions: usize,
    pub pending_orders: usize,
    /// Cost-basis notional already held in the signal's token.
    pub existing_token_exposure_usd: f64,
    pub holds_token: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized { shares: f64, reference_price: f64 },
    Rejected(RejectReason),
}

/// Size a signal against a fund. See module docs for the check order.
pub fn size_signal(fund: &Fund, signal: &Signal, ctx: &SizingContext) -> SizingOutcome {
    // 1. Kill switch gates everything, including exits.
    if fund.risk.kill_switched() {
        return SizingOutcome::Rejected(RejectReason::KillSwitch);
    }

    // 2. Alpha-only validity checks.
    if let Signal::Alpha(alpha) = signal {
        if let Some(reason) = check_alpha_validity(fund, alpha, ctx.now) {
            return SizingOutcome::Rejected(reason);
        }
    }

    // 3. Daily trade-count cap and daily loss stop. The daily notional cap
    //    needs the computed size and is applied after step 4.
    if ctx.daily.trades >= fund.params.max_daily_trades {
        return SizingOutcome::Rejected(RejectReason::DailyLimit);
    }
    if ctx.daily.realized_pnl <= -fund.risk.max_daily_loss_usd {
        return SizingOutcome::Rejected(RejectReason::DailyLimit);
    }

    let price = signal.price();
    if !(price > 0.0 && price < 1.0) {
        // Without a usable reference price nothing downstream can be sized.
        return SizingOutcome::Rejected(RejectReason::BelowMin);
    }
    let side = signal.side().unwrap_or(Side::Buy);

    // 4. Raw size.
    let mut notional = match signal {
        Signal::Trader(t) => mirror_raw_shares(fund, t) * price,
        Signal::Alpha(a) => alpha_raw_notional(fund, a),
    };

    // 5. Position and single-market exposure caps. Sells reduce exposure so
    //    only the per-order cap applies to them.
    notional = notional.min(fund.capital_usd * fund.max_position_pct);
    if side == Side::Buy {
        let headroom =
            (fund.risk.max_market_exposure_usd - ctx.existing_token_exposure_usd).max(0.0);
        notional = notional.min(headroom);

        // 6. Open-position cap applies to new tokens only.
        if !ctx.holds_token && ctx.open_positions >= fund.risk.max_open_positions {
            return SizingOutcome::Rejected(RejectReason::MaxOpen);
        }
    }

    // 7. Concurrency cap.
    if ctx.pending_orders >= fund.params.max_concurrent_orders {
        return SizingOutcome::Rejected(RejectReason::MaxConcurrent);
    }

    // Daily notional cap, applied to the final size the order would carry.
    if ctx.daily.notional_usd + notional > fund.params.max_daily_notional_usd {
        return SizingOutcome::Rejected(RejectReason::DailyLimit);
    }

    // 8. Minimum trade size, after rounding.
    let shares = round_shares(notional / price);
    if shares * price < fund.min_trade_usd {
        return SizingOutcome::Rejected(RejectReason::BelowMin);
    }

    SizingOutcome::Sized {
        shares,
        reference_price: price,
    }
}

fn check_alpha_validity(fund: &Fund, alpha: &AlphaSignal, now: DateTime<Utc>) -> Option<RejectReason> {
    if now >= alpha.expires_at {
        return Some(RejectReason::Expired);
    }
    if alpha.confidence < fund.params.min_confidence || alpha.strength < fund.params.min_strength {
        return Some(RejectReason::UnderThreshold);
    }
    if alpha.action.side().is_none() {
        return Some(RejectReason::NotActionable);
    }
    None
}

/// Mirror sizing: replicate the trader's position scaled by the fund/trader
/// capital ratio and the constituent weight. Unknown trader capital falls
/// back to weight-only scaling.
fn mirror_raw_shares(fund: &Fund, t: &TraderSignal) -> f64 {
    if t.trader_capital > 0.0 {
        t.shares * (fund.capital_usd / t.trader_capital) * t.trader_weight
    } else {
        t.shares * t.trader_weight
    }
}

/// Alpha sizing: explicit suggestion wins, otherwise scale the base
/// allocation by confidence and strength.
fn alpha_raw_notional(fund: &Fund, a: &AlphaSignal) -> f64 {
    if let Some(suggested) = a.suggested_notional {
        return suggested.max(0.0);
    }
    if let Some(fraction) = a.suggested_fraction {
        return fund.capital_usd * fraction.clamp(0.0, 1.0);
    }
    fund.capital_usd
        * fund.params.base_position_pct
        * confidence_scale(a.confidence, fund.params.confidence_scaling)
        * (0.5 + a.strength)
}

fn confidence_scale(confidence: f64, scaling: f64) -> f64 {
    (0.5 + confidence * scaling * 3.0).clamp(0.5, 2.0)
}
