//! Multi-fund orchestrator: instantiate funds from configuration, wire each
//! strategy to its signal queue and executor, and register the periodic
//! tasks. The orchestrator performs no trading itself.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::analytics::AnalyticsClient;
use crate::clock::Clock;
use crate::config::{strategy_kind, AppConfig, StrategyKind};
use crate::executor::FundExecutor;
use crate::gateway::OrderGateway;
use crate::index::IndexWeightProvider;
use crate::marketdata::{TobCache, TobFeed};
use crate::models::Fund;
use crate::queue::SignalQueue;
use crate::registry::{FundRegistry, FundState};
use crate::scheduler::{Scheduler, SkewMonitor, TaskMetrics};
use crate::strategies::{
    AlertFollowerStrategy, CompleteSetStrategy, EdgeRankedStrategy, MirrorStrategy, Strategy,
};

/// Queue-drain cadence shared by every fund.
const PROCESS_TICK: Duration = Duration::from_millis(100);

/// Everything one fund needs at runtime.
pub struct FundRuntime {
    pub fund: Arc<Fund>,
    pub state: Arc<FundState>,
    pub queue: Arc<SignalQueue>,
    pub executor: Arc<FundExecutor>,
    pub strategy: Arc<dyn Strategy>,
    pub poll_task: Arc<TaskMetrics>,
    pub drain_task: Arc<TaskMetrics>,
}

/// Shared collaborators handed to every fund.
pub struct OrchestratorDeps {
    pub registry: Arc<FundRegistry>,
    pub analytics: Arc<dyn AnalyticsClient>,
    pub gateway: Arc<dyn OrderGateway>,
    pub tob: Arc<TobCache>,
    pub feed: Option<Arc<TobFeed>>,
    pub index_provider: Arc<IndexWeightProvider>,
    pub clock: Arc<dyn Clock>,
    pub skew: Arc<SkewMonitor>,
}

pub struct Orchestrator {
    pub runtimes: Vec<Arc<FundRuntime>>,
}

impl Orchestrator {
    /// Build every enabled fund from configuration. Unknown fund ids and
    /// invalid allocations are fatal.
    pub fn build(config: &AppConfig, deps: &OrchestratorDeps) -> Result<Self> {
        let mut runtimes = Vec::new();

        for allocation in config.enabled_funds() {
            let fund = Arc::new(
                allocation
                    .build_fund(config.total_capital_usd, config.global_kill_switch)
                    .with_context(|| format!("build fund {}", allocation.id))?,
            );
            let kind = strategy_kind(&fund.id)?;
            let state = deps.registry.register(fund.clone());
            let queue = Arc::new(SignalQueue::new(fund.id.clone(), fund.signal_delay));
            let executor = FundExecutor::new(
                fund.clone(),
                queue.clone(),
                deps.gateway.clone(),
                deps.analytics.clone(),
                deps.tob.clone(),
                deps.clock.clone(),
                state.clone(),
            );

            let strategy: Arc<dyn Strategy> = match kind {
                StrategyKind::Mirror => Arc::new(MirrorStrategy::new(
                    fund.clone(),
                    queue.clone(),
                    deps.analytics.clone(),
                    deps.index_provider.clone(),
                    deps.clock.clone(),
                    state.metrics.clone(),
                    deps.skew.clone(),
                )),
                StrategyKind::AlertFollower => Arc::new(AlertFollowerStrategy::new(
                    fund.clone(),
                    queue.clone(),
                    deps.analytics.clone(),
                    deps.tob.clone(),
                    deps.clock.clone(),
                    state.metrics.clone(),
                    deps.skew.clone(),
                )),
                StrategyKind::EdgeRanked => Arc::new(EdgeRankedStrategy::new(
                    fund.clone(),
                    queue.clone(),
                    deps.analytics.clone(),
                    deps.clock.clone(),
                    state.metrics.clone(),
                    deps.skew.clone(),
                )),
                StrategyKind::CompleteSet => Arc::new(CompleteSetStrategy::new(
                    fund.clone(),
                    queue.clone(),
                    deps.analytics.clone(),
                    deps.tob.clone(),
                    deps.feed.clone(),
                    executor.clone(),
                    deps.clock.clone(),
                    state.metrics.clone(),
                )),
            };

            info!(
                fund = %fund.id,
                category = fund.category.as_str(),
                capital = fund.capital_usd,
                delay_secs = fund.signal_delay.as_secs(),
                "fund registered"
            );

            runtimes.push(Arc::new(FundRuntime {
                fund,
                state,
                queue,
                executor,
                strategy,
                poll_task: Arc::new(TaskMetrics::default()),
                drain_task: Arc::new(TaskMetrics::default()),
            }));
        }

        if runtimes.is_empty() {
            anyhow::bail!("no enabled funds in configuration");
        }
        Ok(Self { runtimes })
    }

    /// Register the per-fund poll, queue-drain, and optional maintenance
    /// tasks with the scheduler.
    pub fn spawn_tasks(&self, scheduler: &Scheduler) {
        for runtime in &self.runtimes {
            let strategy = runtime.strategy.clone();
            scheduler.spawn_periodic(
                format!("{}-poll", runtime.fund.id),
                strategy.poll_interval(),
                runtime.poll_task.clone(),
                move || {
                    let strategy = strategy.clone();
                    async move { strategy.poll().await }
                },
            );

            let executor = runtime.executor.clone();
            scheduler.spawn_periodic(
                format!("{}-drain", runtime.fund.id),
                PROCESS_TICK,
                runtime.drain_task.clone(),
                move || {
                    let executor = executor.clone();
                    async move {
                        executor.process_due().await;
                    }
                },
            );

            if let Some(interval) = runtime.strategy.maintenance_interval() {
                let strategy = runtime.strategy.clone();
                scheduler.spawn_periodic(
                    format!("{}-maintenance", runtime.fund.id),
                    interval,
                    Arc::new(TaskMetrics::default()),
                    move || {
                        let strategy = strategy.clone();
                        async move { strategy.maintenance().await }
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SqliteAnalyticsStore;
    use crate::config::{FundAllocation, GatewaySettings};
    use crate::gateway::PaperGateway;
    use crate::models::ExecutionMode;

    fn allocation(id: &str, pct: f64) -> FundAllocation {
        FundAllocation {
            id: id.to_string(),
            enabled: true,
            capital_usd: None,
            capital_pct: Some(pct),
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

    fn config() -> AppConfig {
        AppConfig {
            db_path: ":memory:".into(),
            port: 0,
            total_capital_usd: 100_000.0,
            global_kill_switch: false,
            gateway: GatewaySettings {
                base_url: String::new(),
                api_key: String::new(),
                secret: String::new(),
                passphrase: String::new(),
                paper: true,
            },
            feed_ws_url: String::new(),
            funds: vec![
                allocation("PSI-10", 0.4),
                allocation("ALPHA-INSIDER", 0.2),
                allocation("ALPHA-EDGE", 0.2),
                allocation("ALPHA-ARB", 0.1),
                FundAllocation {
                    enabled: false,
                    ..allocation("PSI-50", 0.1)
                },
            ],
        }
    }

    fn deps() -> OrchestratorDeps {
        let analytics = Arc::new(SqliteAnalyticsStore::in_memory().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock::new());
        OrchestratorDeps {
            registry: Arc::new(FundRegistry::new()),
            analytics: analytics.clone(),
            gateway: Arc::new(PaperGateway::new(100_000.0)),
            tob: Arc::new(TobCache::new()),
            feed: None,
            index_provider: Arc::new(IndexWeightProvider::new(analytics)),
            clock: clock.clone(),
            skew: SkewMonitor::new(clock),
        }
    }

    #[tokio::test]
    async fn builds_enabled_funds_only() {
        let deps = deps();
        let orchestrator = Orchestrator::build(&config(), &deps).unwrap();

        assert_eq!(orchestrator.runtimes.len(), 4);
        assert_eq!(deps.registry.len(), 4);
        assert!(deps.registry.get("PSI-50").is_none());

        let psi = deps.registry.get("PSI-10").unwrap();
        assert_eq!(psi.fund.capital_usd, 40_000.0);
    }

    #[tokio::test]
    async fn unknown_fund_id_is_fatal() {
        let mut cfg = config();
        cfg.funds.push(allocation("WAT-1", 0.05));
        assert!(Orchestrator::build(&cfg, &deps()).is_err());
    }
}
