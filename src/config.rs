//! Process configuration: environment variables for the ambient pieces,
//! a TOML allocation file for the funds themselves.
//!
//! Configuration errors are fatal: `main` propagates them and the process
//! exits non-zero. Nothing here mutates after startup except the per-fund
//! kill switches.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ExecutionMode, Fund, FundCategory, RiskLimits, StrategyParams};

/// Which strategy variant a fund id maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Mirror,
    AlertFollower,
    EdgeRanked,
    CompleteSet,
}

/// Fund-id taxonomy: `PSI-*` mirrors an index, the `ALPHA-*` ids name the
/// active variants.
pub fn strategy_kind(fund_id: &str) -> Result<StrategyKind> {
    if fund_id.starts_with("PSI-") {
        return Ok(StrategyKind::Mirror);
    }
    match fund_id {
        "ALPHA-INSIDER" => Ok(StrategyKind::AlertFollower),
        "ALPHA-EDGE" => Ok(StrategyKind::EdgeRanked),
        "ALPHA-ARB" => Ok(StrategyKind::CompleteSet),
        other => bail!("fund id '{other}' matches no known strategy taxonomy"),
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    /// Paper mode routes orders to the in-process paper gateway.
    pub paper: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub port: u16,
    pub total_capital_usd: f64,
    pub global_kill_switch: bool,
    pub gateway: GatewaySettings,
    pub feed_ws_url: String,
    pub funds: Vec<FundAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundsFile {
    pub total_capital_usd: Option<f64>,
    #[serde(default)]
    pub funds: Vec<FundAllocation>,
}

fn default_true() -> bool {
    true
}
fn default_max_position_pct() -> f64 {
    0.10
}
fn default_min_trade_usd() -> f64 {
    5.0
}
fn default_signal_delay_secs() -> u64 {
    5
}
fn default_max_slippage() -> f64 {
    0.02
}
fn default_max_daily_loss_usd() -> f64 {
    500.0
}
fn default_max_drawdown_pct() -> f64 {
    0.25
}
fn default_max_open_positions() -> usize {
    10
}
fn default_max_market_exposure_usd() -> f64 {
    1_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundAllocation {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub capital_usd: Option<f64>,
    pub capital_pct: Option<f64>,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_min_trade_usd")]
    pub min_trade_usd: f64,
    #[serde(default = "default_signal_delay_secs")]
    pub signal_delay_secs: u64,
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_max_market_exposure_usd")]
    pub max_market_exposure_usd: f64,
    /// Mirror funds: index to track; defaults to the fund id.
    pub index: Option<String>,
    // Optional strategy-parameter overrides.
    pub max_daily_trades: Option<u32>,
    pub max_daily_notional_usd: Option<f64>,
    pub max_concurrent_orders: Option<usize>,
    pub min_confidence: Option<f64>,
    pub min_strength: Option<f64>,
    pub base_position_pct: Option<f64>,
    pub confidence_scaling: Option<f64>,
    pub cooldown_secs: Option<u64>,
    pub max_arb_notional_usd: Option<f64>,
}

impl FundAllocation {
    pub fn validate(&self) -> Result<()> {
        strategy_kind(&self.id).context("invalid fund id")?;
        if self.capital_usd.is_none() && self.capital_pct.is_none() {
            bail!("fund {}: capital_usd or capital_pct required", self.id);
        }
        if let Some(pct) = self.capital_pct {
            if !(0.0..=1.0).contains(&pct) {
                bail!("fund {}: capital_pct {} outside [0, 1]", self.id, pct);
            }
        }
        if let Some(usd) = self.capital_usd {
            if usd < 0.0 {
                bail!("fund {}: negative capital", self.id);
            }
        }
        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 1.0) {
            bail!(
                "fund {}: max_position_pct {} outside (0, 1]",
                self.id,
                self.max_position_pct
            );
        }
        if !(0.0..=1.0).contains(&self.max_slippage) {
            bail!(
                "fund {}: max_slippage {} outside [0, 1]",
                self.id,
                self.max_slippage
            );
        }
        if self.max_open_positions == 0 {
            bail!("fund {}: max_open_positions must be at least 1", self.id);
        }
        Ok(())
    }

    pub fn effective_capital(&self, pool_usd: f64) -> f64 {
        self.capital_usd
            .unwrap_or_else(|| pool_usd * self.capital_pct.unwrap_or(0.0))
    }

    pub fn build_fund(&self, pool_usd: f64, global_kill_switch: bool) -> Result<Fund> {
        self.validate()?;
        let category = match strategy_kind(&self.id)? {
            StrategyKind::Mirror => FundCategory::Mirror,
            _ => FundCategory::Active,
        };

        let defaults = StrategyParams::default();
        let params = StrategyParams {
            max_daily_trades: self.max_daily_trades.unwrap_or(defaults.max_daily_trades),
            max_daily_notional_usd: self
                .max_daily_notional_usd
                .unwrap_or(defaults.max_daily_notional_usd),
            max_concurrent_orders: self
                .max_concurrent_orders
                .unwrap_or(defaults.max_concurrent_orders),
            min_confidence: self.min_confidence.unwrap_or(defaults.min_confidence),
            min_strength: self.min_strength.unwrap_or(defaults.min_strength),
            base_position_pct: self.base_position_pct.unwrap_or(defaults.base_position_pct),
            confidence_scaling: self
                .confidence_scaling
                .unwrap_or(defaults.confidence_scaling),
            cooldown: self
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cooldown),
            max_arb_notional_usd: self
                .max_arb_notional_usd
                .unwrap_or(defaults.max_arb_notional_usd),
            index: self.index.clone(),
        };

        Ok(Fund {
            id: self.id.clone(),
            category,
            capital_usd: self.effective_capital(pool_usd),
            max_position_pct: self.max_position_pct,
            min_trade_usd: self.min_trade_usd,
            signal_delay: Duration::from_secs(self.signal_delay_secs),
            max_slippage: self.max_slippage,
            execution_mode: self.execution_mode,
            risk: RiskLimits {
                max_daily_loss_usd: self.max_daily_loss_usd,
                max_drawdown_pct: self.max_drawdown_pct,
                max_open_positions: self.max_open_positions,
                max_market_exposure_usd: self.max_market_exposure_usd,
                kill_switch: Arc::new(AtomicBool::new(global_kill_switch)),
            },
            params,
            started_at: Utc::now(),
        })
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let db_path = env::var("DB_PATH").unwrap_or_else(|_| "./psifund.db".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("invalid PORT")?;

        let funds_path =
            env::var("FUNDS_CONFIG").unwrap_or_else(|_| "funds.toml".to_string());
        let funds_file = Self::load_funds_file(Path::new(&funds_path))
            .with_context(|| format!("load fund allocations from {funds_path}"))?;

        let total_capital_usd = match env::var("TOTAL_CAPITAL_USD") {
            Ok(v) => v.parse().context("invalid TOTAL_CAPITAL_USD")?,
            Err(_) => funds_file.total_capital_usd.unwrap_or(10_000.0),
        };
        if total_capital_usd < 0.0 {
            bail!("total capital pool cannot be negative");
        }

        let gateway = GatewaySettings {
            base_url: env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "https://clob.example.com".to_string()),
            api_key: env::var("GATEWAY_API_KEY").unwrap_or_default(),
            secret: env::var("GATEWAY_SECRET").unwrap_or_default(),
            passphrase: env::var("GATEWAY_PASSPHRASE").unwrap_or_default(),
            paper: env_flag("GATEWAY_PAPER", true),
        };
        if !gateway.paper && (gateway.api_key.is_empty() || gateway.secret.is_empty()) {
            bail!("live gateway requires GATEWAY_API_KEY and GATEWAY_SECRET");
        }

        let config = Self {
            db_path,
            port,
            total_capital_usd,
            global_kill_switch: env_flag("GLOBAL_KILL_SWITCH", false),
            gateway,
            feed_ws_url: env::var("FEED_WS_URL")
                .unwrap_or_else(|_| "wss://md.example.com/ws/tob".to_string()),
            funds: funds_file.funds,
        };

        for allocation in &config.funds {
            allocation.validate()?;
        }
        let pct_total: f64 = config
            .funds
            .iter()
            .filter(|f| f.enabled && f.capital_usd.is_none())
            .filter_map(|f| f.capital_pct)
            .sum();
        if pct_total > 1.0 + 1e-9 {
            bail!("enabled capital_pct allocations sum to {pct_total:.3} > 1.0");
        }

        Ok(config)
    }

    pub fn load_funds_file(path: &Path) -> Result<FundsFile> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let file: FundsFile = toml::from_str(&raw).context("parse fund allocation TOML")?;
        Ok(file)
    }

    pub fn enabled_funds(&self) -> impl Iterator<Item = &FundAllocation> {
        self.funds.iter().filter(|f| f.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(id: &str) -> FundAllocation {
        FundAllocation {
            id: id.to_string(),
            enabled: true,
            capital_usd: None,
            capital_pct: Some(0.25),
            max_position_pct: 0.10,
            min_trade_usd: 5.0,
            signal_delay_secs: 5,
            max_slippage: 0.02,
            execution_mode: ExecutionMode::LimitOnly,
            max_daily_loss_usd: 500.0,
            max_drawdown_pct: 0.25,
            max_open_positions: 10,
            max_market_exposure_usd: 1_000.0,
            index: None,
            max_daily_trades: None,
            max_daily_notional_usd: None,
            max_concurrent_orders: None,
            min_confidence: None,
            min_strength: None,
            base_position_pct: None,
            confidence_scaling: None,
            cooldown_secs: None,
            max_arb_notional_usd: None,
        }
    }

    #[test]
    fn taxonomy_maps_ids_to_strategies() {
        assert_eq!(strategy_kind("PSI-10").unwrap(), StrategyKind::Mirror);
        assert_eq!(strategy_kind("PSI-TOP-50").unwrap(), StrategyKind::Mirror);
        assert_eq!(
            strategy_kind("ALPHA-INSIDER").unwrap(),
            StrategyKind::AlertFollower
        );
        assert_eq!(strategy_kind("ALPHA-EDGE").unwrap(), StrategyKind::EdgeRanked);
        assert_eq!(strategy_kind("ALPHA-ARB").unwrap(), StrategyKind::CompleteSet);
        assert!(strategy_kind("MYSTERY-1").is_err());
    }

    #[test]
    fn capital_resolution_prefers_absolute() {
        let mut a = allocation("PSI-10");
        assert_eq!(a.effective_capital(100_000.0), 25_000.0);
        a.capital_usd = Some(7_500.0);
        assert_eq!(a.effective_capital(100_000.0), 7_500.0);
    }

    #[test]
    fn validation_rejects_bad_fractions() {
        let mut a = allocation("PSI-10");
        a.max_position_pct = 1.5;
        assert!(a.validate().is_err());

        let mut b = allocation("PSI-10");
        b.capital_pct = None;
        assert!(b.validate().is_err());

        let mut c = allocation("PSI-10");
        c.max_open_positions = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn build_fund_applies_overrides_and_kill_switch() {
        let mut a = allocation("ALPHA-ARB");
        a.max_arb_notional_usd = Some(250.0);
        a.cooldown_secs = Some(120);
        let fund = a.build_fund(100_000.0, true).unwrap();

        assert_eq!(fund.category, FundCategory::Active);
        assert_eq!(fund.capital_usd, 25_000.0);
        assert_eq!(fund.params.max_arb_notional_usd, 250.0);
        assert_eq!(fund.params.cooldown, Duration::from_secs(120));
        assert!(fund.risk.kill_switched());
    }

    #[test]
    fn funds_file_parses_toml() {
        let raw = r#"
total_capital_usd = 100000.0

[[funds]]
id = "PSI-10"
capital_pct = 0.25

[[funds]]
id = "ALPHA-ARB"
enabled = false
capital_usd = 5000.0
execution_mode = "limit_then_market"
max_arb_notional_usd = 200.0
"#;
        let file: FundsFile = toml::from_str(raw).unwrap();
        assert_eq!(file.total_capital_usd, Some(100_000.0));
        assert_eq!(file.funds.len(), 2);
        assert!(file.funds[0].enabled);
        assert!(!file.funds[1].enabled);
        assert_eq!(
            file.funds[1].execution_mode,
            ExecutionMode::LimitThenMarket
        );
        assert_eq!(file.funds[0].max_position_pct, 0.10);
    }
}
