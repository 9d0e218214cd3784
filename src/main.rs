//! psifund - multi-fund trading pipeline for a binary prediction-market venue.
//!
//! Startup order: configuration, analytics store, market-data feed, fund
//! orchestration, scheduler tasks, status API. A single stop token shuts
//! every periodic task down; in-flight calls run to their deadline.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use psifund_backend::{
    analytics::SqliteAnalyticsStore,
    api::{self, AppState},
    clock::{Clock, SystemClock},
    config::AppConfig,
    gateway::{ClobGatewayClient, GatewayCredentials, OrderGateway, PaperGateway},
    index::IndexWeightProvider,
    marketdata::{TobCache, TobFeed, TobFeedConfig},
    orchestrator::{Orchestrator, OrchestratorDeps},
    registry::FundRegistry,
    scheduler::{Scheduler, SkewMonitor},
};

#[derive(Debug, Parser)]
#[command(name = "psifund", about = "Multi-fund signal-to-order pipeline")]
struct Args {
    /// Fund allocation file (overrides FUNDS_CONFIG).
    #[arg(long)]
    config: Option<String>,

    /// Force the in-process paper gateway regardless of environment.
    #[arg(long)]
    paper: bool,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("FUNDS_CONFIG", path);
    }

    let config = AppConfig::from_env().context("configuration error")?;
    info!(
        funds = config.funds.len(),
        pool_usd = config.total_capital_usd,
        paper = config.gateway.paper || args.paper,
        "psifund starting"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let analytics =
        Arc::new(SqliteAnalyticsStore::new(&config.db_path).context("open analytics store")?);
    info!(db = %config.db_path, "analytics store ready");

    // Market-data plumbing: the feed adapter is the cache's only writer.
    let tob = Arc::new(TobCache::new());
    let feed = TobFeed::new(
        TobFeedConfig {
            ws_url: config.feed_ws_url.clone(),
            ..TobFeedConfig::default()
        },
        tob.clone(),
    );
    tokio::spawn(feed.clone().run(stop_rx.clone()));

    let gateway: Arc<dyn OrderGateway> = if config.gateway.paper || args.paper {
        info!("paper gateway active, no live orders will be sent");
        Arc::new(PaperGateway::new(config.total_capital_usd))
    } else {
        Arc::new(
            ClobGatewayClient::new(
                config.gateway.base_url.clone(),
                GatewayCredentials {
                    api_key: config.gateway.api_key.clone(),
                    secret: config.gateway.secret.clone(),
                    passphrase: config.gateway.passphrase.clone(),
                },
            )
            .context("build gateway client")?,
        )
    };
    match gateway.fetch_balance().await {
        Ok(balance) => info!(balance_usd = balance, "gateway reachable"),
        Err(e) => warn!(error = %e, "gateway balance check failed, continuing"),
    }

    let registry = Arc::new(FundRegistry::new());
    let skew = SkewMonitor::new(clock.clone());
    let deps = OrchestratorDeps {
        registry: registry.clone(),
        analytics: analytics.clone(),
        gateway,
        tob: tob.clone(),
        feed: Some(feed),
        index_provider: Arc::new(IndexWeightProvider::new(analytics.clone())),
        clock: clock.clone(),
        skew: skew.clone(),
    };

    let orchestrator = Orchestrator::build(&config, &deps).context("build funds")?;
    info!(funds = orchestrator.runtimes.len(), "funds wired");

    let scheduler = Scheduler::new(stop_rx);
    orchestrator.spawn_tasks(&scheduler);
    scheduler.spawn_skew_watchdog(skew);

    let app_state = AppState {
        runtimes: Arc::new(orchestrator.runtimes),
        registry,
        analytics,
        started_at: clock.now_utc(),
    };
    let app = api::router()
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("bind API port")?;
    info!(addr = %addr, "status API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, stopping periodic tasks");
            let _ = stop_tx.send(true);
        })
        .await
        .context("server error")?;

    info!("psifund stopped");
    Ok(())
}
