//! Fund registry: per-fund state, P&L, and metrics counters.
//!
//! Frequent reads (status surface, strategies checking their own fund),
//! rare writes (registration at startup, increments after executions).
//! Counters are atomics so metric updates never take the registry lock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{Fund, FundPosition};

/// Per-fund metric counters. All relaxed: these feed dashboards, not logic.
#[derive(Debug, Default)]
pub struct FundMetrics {
    pub signals_emitted: AtomicU64,
    pub signals_executed: AtomicU64,
    pub signals_filtered: AtomicU64,
    pub signals_duplicate: AtomicU64,
    pub orders_submitted: AtomicU64,
    pub orders_failed: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub persist_failures: AtomicU64,
    pub polls_failed: AtomicU64,
    pub oversell_clamps: AtomicU64,
    pub wildcard_exits: AtomicU64,
    pub decay_events: AtomicU64,
}

impl FundMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FundMetricsSnapshot {
        FundMetricsSnapshot {
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            signals_executed: self.signals_executed.load(Ordering::Relaxed),
            signals_filtered: self.signals_filtered.load(Ordering::Relaxed),
            signals_duplicate: self.signals_duplicate.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_failed: self.orders_failed.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            oversell_clamps: self.oversell_clamps.load(Ordering::Relaxed),
            wildcard_exits: self.wildcard_exits.load(Ordering::Relaxed),
            decay_events: self.decay_events.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FundMetricsSnapshot {
    pub signals_emitted: u64,
    pub signals_executed: u64,
    pub signals_filtered: u64,
    pub signals_duplicate: u64,
    pub orders_submitted: u64,
    pub orders_failed: u64,
    pub orders_rejected: u64,
    pub persist_failures: u64,
    pub polls_failed: u64,
    pub oversell_clamps: u64,
    pub wildcard_exits: u64,
    pub decay_events: u64,
}

/// Handle to a fund's live position map. The executor is the only writer;
/// the registry and status surface read snapshots.
pub type PositionsHandle = Arc<RwLock<HashMap<String, FundPosition>>>;

pub struct FundState {
    pub fund: Arc<Fund>,
    pub metrics: Arc<FundMetrics>,
    pub positions: PositionsHandle,
    realized_pnl: Mutex<f64>,
    daily_trades: AtomicU64,
    daily_notional_cents: AtomicU64,
    pending_signals: AtomicU64,
}

impl FundState {
    pub fn new(fund: Arc<Fund>) -> Self {
        Self {
            fund,
            metrics: Arc::new(FundMetrics::default()),
            positions: Arc::new(RwLock::new(HashMap::new())),
            realized_pnl: Mutex::new(0.0),
            daily_trades: AtomicU64::new(0),
            daily_notional_cents: AtomicU64::new(0),
            pending_signals: AtomicU64::new(0),
        }
    }

    pub fn add_realized_pnl(&self, delta: f64) {
        *self.realized_pnl.lock() += delta;
    }

    pub fn realized_pnl(&self) -> f64 {
        *self.realized_pnl.lock()
    }

    /// Executor pushes its daily counters here after each execution so the
    /// status surface can render them without touching executor state.
    pub fn report_daily(&self, trades: u64, notional_usd: f64) {
        self.daily_trades.store(trades, Ordering::Relaxed);
        self.daily_notional_cents
            .store((notional_usd * 100.0).round().max(0.0) as u64, Ordering::Relaxed);
    }

    pub fn report_pending_signals(&self, pending: u64) {
        self.pending_signals.store(pending, Ordering::Relaxed);
    }

    pub fn open_positions(&self) -> usize {
        self.positions.read().len()
    }

    /// Cost basis of all open positions.
    pub fn positions_notional(&self) -> f64 {
        self.positions.read().values().map(|p| p.notional()).sum()
    }

    pub fn status(&self) -> FundStatus {
        FundStatus {
            fund_id: self.fund.id.clone(),
            category: self.fund.category.as_str().to_string(),
            capital_usd: self.fund.capital_usd,
            kill_switch: self.fund.risk.kill_switched(),
            realized_pnl: self.realized_pnl(),
            open_positions: self.open_positions(),
            positions_notional: self.positions_notional(),
            pending_signals: self.pending_signals.load(Ordering::Relaxed),
            daily_trades: self.daily_trades.load(Ordering::Relaxed),
            daily_notional_usd: self.daily_notional_cents.load(Ordering::Relaxed) as f64 / 100.0,
            started_at: self.fund.started_at,
            metrics: self.metrics.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FundStatus {
    pub fund_id: String,
    pub category: String,
    pub capital_usd: f64,
    pub kill_switch: bool,
    pub realized_pnl: f64,
    pub open_positions: usize,
    pub positions_notional: f64,
    pub pending_signals: u64,
    pub daily_trades: u64,
    pub daily_notional_usd: f64,
    pub started_at: DateTime<Utc>,
    pub metrics: FundMetricsSnapshot,
}

#[derive(Default)]
pub struct FundRegistry {
    funds: RwLock<HashMap<String, Arc<FundState>>>,
}

impl FundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fund: Arc<Fund>) -> Arc<FundState> {
        let state = Arc::new(FundState::new(fund.clone()));
        self.funds.write().insert(fund.id.clone(), state.clone());
        state
    }

    pub fn get(&self, fund_id: &str) -> Option<Arc<FundState>> {
        self.funds.read().get(fund_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<FundState>> {
        let mut states: Vec<_> = self.funds.read().values().cloned().collect();
        states.sort_by(|a, b| a.fund.id.cmp(&b.fund.id));
        states
    }

    pub fn len(&self) -> usize {
        self.funds.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.funds.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionMode, FundCategory, RiskLimits, StrategyParams};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn fund(id: &str) -> Arc<Fund> {
        Arc::new(Fund {
            id: id.to_string(),
            category: FundCategory::Active,
            capital_usd: 10_000.0,
            max_position_pct: 0.10,
            min_trade_usd: 5.0,
            signal_delay: Duration::from_secs(5),
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
            started_at: Utc::now(),
        })
    }

    #[test]
    fn register_and_status() {
        let registry = FundRegistry::new();
        let state = registry.register(fund("ALPHA-ARB"));
        state.add_realized_pnl(12.5);
        state.report_daily(3, 420.0);

        let status = registry.get("ALPHA-ARB").unwrap().status();
        assert_eq!(status.fund_id, "ALPHA-ARB");
        assert_eq!(status.daily_trades, 3);
        assert!((status.daily_notional_usd - 420.0).abs() < 1e-9);
        assert!((status.realized_pnl - 12.5).abs() < 1e-9);
        assert_eq!(status.open_positions, 0);
    }

    #[test]
    fn all_is_sorted_by_id() {
        let registry = FundRegistry::new();
        registry.register(fund("PSI-10"));
        registry.register(fund("ALPHA-EDGE"));
        let ids: Vec<String> = registry
            .all()
            .iter()
            .map(|s| s.fund.id.clone())
            .collect();
        assert_eq!(ids, vec!["ALPHA-EDGE".to_string(), "PSI-10".to_string()]);
    }
}
