//! Core domain types shared across the fund pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Fund category per the fund-id taxonomy (`PSI-*` mirror, `ALPHA-*` active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundCategory {
    Mirror,
    Active,
}

impl FundCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundCategory::Mirror => "mirror",
            FundCategory::Active => "active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    LimitOnly,
    LimitThenMarket,
    MarketOnly,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::LimitOnly
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Trader-signal type for mirror funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Sell,
    Close,
}

impl SignalKind {
    pub fn side(&self) -> Side {
        match self {
            SignalKind::Buy => Side::Buy,
            SignalKind::Sell | SignalKind::Close => Side::Sell,
        }
    }
}

/// Alpha-signal action for active funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaAction {
    Buy,
    Sell,
    Hold,
}

impl AlphaAction {
    pub fn side(&self) -> Option<Side> {
        match self {
            AlphaAction::Buy => Some(Side::Buy),
            AlphaAction::Sell => Some(Side::Sell),
            AlphaAction::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Slippage multiplier applied when deriving the limit price.
    pub fn slippage_multiplier(&self) -> f64 {
        match self {
            Urgency::Low => 0.5,
            Urgency::Medium => 1.0,
            Urgency::High => 1.5,
            Urgency::Critical => 2.0,
        }
    }

    /// Map an alert severity onto an urgency tier.
    pub fn from_severity(severity: &str) -> Self {
        match severity {
            "CRITICAL" => Urgency::Critical,
            "HIGH" => Urgency::High,
            "WARNING" => Urgency::Medium,
            _ => Urgency::Low,
        }
    }
}

/// Sentinel token/market meaning "all positions attributable to this source".
pub const WILDCARD: &str = "*";

/// A qualifying trade observed from a mirrored trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderSignal {
    pub id: String,
    pub username: String,
    pub proxy_address: String,
    pub market_slug: String,
    pub token_id: String,
    pub outcome: String,
    pub kind: SignalKind,
    pub shares: f64,
    pub price: f64,
    pub notional: f64,
    pub detected_at: DateTime<Utc>,
    pub trader_executed_at: DateTime<Utc>,
    /// Constituent weight at detection time.
    pub trader_weight: f64,
    /// Estimated trader capital at detection time (USD).
    pub trader_capital: f64,
}

/// A strategy-generated signal for active funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaSignal {
    pub id: String,
    /// Source tag: trader proxy for follower funds, alert id, or arb scanner.
    pub source: String,
    pub action: AlphaAction,
    pub market_slug: String,
    pub token_id: String,
    pub outcome: String,
    pub confidence: f64,
    pub strength: f64,
    pub urgency: Urgency,
    /// Reference price at detection (0..1). Sizing converts shares <-> notional with it.
    pub price: f64,
    pub suggested_notional: Option<f64>,
    pub suggested_fraction: Option<f64>,
    pub reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AlphaSignal {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_wildcard(&self) -> bool {
        self.token_id == WILDCARD
    }
}

/// Either flavour of signal flowing through a fund's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Signal {
    Trader(TraderSignal),
    Alpha(AlphaSignal),
}

impl Signal {
    pub fn id(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.id,
            Signal::Alpha(s) => &s.id,
        }
    }

    pub fn token_id(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.token_id,
            Signal::Alpha(s) => &s.token_id,
        }
    }

    pub fn market_slug(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.market_slug,
            Signal::Alpha(s) => &s.market_slug,
        }
    }

    pub fn outcome(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.outcome,
            Signal::Alpha(s) => &s.outcome,
        }
    }

    pub fn price(&self) -> f64 {
        match self {
            Signal::Trader(s) => s.price,
            Signal::Alpha(s) => s.price,
        }
    }

    pub fn urgency(&self) -> Urgency {
        match self {
            // Mirror signals always execute at the default urgency tier.
            Signal::Trader(_) => Urgency::Medium,
            Signal::Alpha(s) => s.urgency,
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Trader(s) => Some(s.kind.side()),
            Signal::Alpha(s) => s.action.side(),
        }
    }

    /// Source tag persisted with the execution and attached to opened positions.
    pub fn source_tag(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.proxy_address,
            Signal::Alpha(s) => &s.source,
        }
    }

    pub fn trader_username(&self) -> &str {
        match self {
            Signal::Trader(s) => &s.username,
            Signal::Alpha(s) => &s.source,
        }
    }
}

/// Risk limits for one fund. Only the kill switch mutates at runtime.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_daily_loss_usd: f64,
    pub max_drawdown_pct: f64,
    pub max_open_positions: usize,
    pub max_market_exposure_usd: f64,
    pub kill_switch: Arc<AtomicBool>,
}

impl RiskLimits {
    pub fn kill_switched(&self) -> bool {
        self.kill_switch.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_kill_switch(&self, on: bool) {
        self.kill_switch
            .store(on, std::sync::atomic::Ordering::Relaxed);
    }
}

/// Strategy-specific knobs. Defaults match the production allocations.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub max_daily_trades: u32,
    pub max_daily_notional_usd: f64,
    pub max_concurrent_orders: usize,
    pub min_confidence: f64,
    pub min_strength: f64,
    /// Base position fraction of capital for alpha sizing.
    pub base_position_pct: f64,
    pub confidence_scaling: f64,
    /// Per-market signal cooldown for follower strategies.
    pub cooldown: Duration,
    /// Total notional an arb pair may deploy (both legs combined).
    pub max_arb_notional_usd: f64,
    /// Mirror funds: which index supplies the constituents.
    pub index: Option<String>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            max_daily_trades: 100,
            max_daily_notional_usd: 25_000.0,
            max_concurrent_orders: 5,
            min_confidence: 0.55,
            min_strength: 0.2,
            base_position_pct: 0.05,
            confidence_scaling: 0.5,
            cooldown: Duration::from_secs(60),
            max_arb_notional_usd: 100.0,
            index: None,
        }
    }
}

/// Immutable fund record. Created at startup from configuration.
#[derive(Debug, Clone)]
pub struct Fund {
    pub id: String,
    pub category: FundCategory,
    pub capital_usd: f64,
    pub max_position_pct: f64,
    pub min_trade_usd: f64,
    /// Anti-front-running delay between detection and execution.
    pub signal_delay: Duration,
    pub max_slippage: f64,
    pub execution_mode: ExecutionMode,
    pub risk: RiskLimits,
    pub params: StrategyParams,
    pub started_at: DateTime<Utc>,
}

/// One constituent of a mirror fund's index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConstituent {
    pub username: String,
    pub proxy_address: String,
    pub weight: f64,
    pub rank: u32,
    pub estimated_capital_usd: f64,
    pub score: f64,
    pub strategy_tag: String,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

/// An open position held by one fund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundPosition {
    pub id: String,
    pub market_slug: String,
    pub token_id: String,
    pub outcome: String,
    pub shares: f64,
    /// Share-weighted average of BUY prices since shares last reached zero.
    pub avg_cost: f64,
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub signal_id: String,
    /// Originating trader proxy (follower funds) for decay-exit attribution.
    pub source_tag: Option<String>,
}

impl FundPosition {
    pub fn notional(&self) -> f64 {
        self.shares * self.avg_cost
    }
}

/// An order submitted to the gateway but not yet finalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub signal_id: String,
    pub side: Side,
    pub shares: f64,
    pub limit_price: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Append-only execution record persisted through the analytics client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub signal_id: String,
    pub fund_id: String,
    pub trader_username: String,
    pub market_slug: String,
    pub token_id: String,
    pub outcome: String,
    pub side: Side,
    pub trader_shares: f64,
    pub fund_shares: f64,
    pub execution_price: f64,
    pub order_id: String,
    pub detected_at: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
}

/// Latest top-of-book snapshot for one token. Replaced wholesale on update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopOfBook {
    pub token_id: String,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub updated_at: DateTime<Utc>,
}

impl TopOfBook {
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now.signed_duration_since(self.updated_at).num_milliseconds()
            <= max_age.as_millis() as i64
    }

    /// Dollar value resting at the best ask.
    pub fn ask_notional(&self) -> f64 {
        self.ask * self.ask_size
    }

    pub fn bid_notional(&self) -> f64 {
        self.bid * self.bid_size
    }

    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }
}
