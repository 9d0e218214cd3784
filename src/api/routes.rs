//! API routes: per-fund status, the aggregate view, recent executions, and
//! the runtime kill switch.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::registry::FundStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/fund/status", get(get_fund_status))
        .route("/api/funds/all", get(get_funds_all))
        .route("/api/executions/recent", get(get_recent_executions))
        .route("/api/fund/kill", post(post_fund_kill))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub funds: usize,
    pub uptime_secs: i64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        funds: state.registry.len(),
        uptime_secs: Utc::now()
            .signed_duration_since(state.started_at)
            .num_seconds(),
    })
}

#[derive(Debug, Deserialize)]
pub struct FundQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct FundStatusResponse {
    #[serde(flatten)]
    pub status: FundStatus,
    pub unrealized_pnl: f64,
    pub nav_usd: f64,
}

async fn get_fund_status(
    Query(params): Query<FundQuery>,
    State(state): State<AppState>,
) -> Result<Json<FundStatusResponse>, StatusCode> {
    let runtime = state.runtime(&params.id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(fund_response(runtime)))
}

fn fund_response(runtime: &crate::orchestrator::FundRuntime) -> FundStatusResponse {
    let status = runtime.state.status();
    let unrealized = runtime.executor.unrealized_pnl();
    let nav = status.capital_usd + status.realized_pnl + unrealized;
    FundStatusResponse {
        status,
        unrealized_pnl: unrealized,
        nav_usd: nav,
    }
}

#[derive(Debug, Serialize)]
pub struct AggregateTotals {
    pub capital_usd: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub nav_usd: f64,
    pub open_positions: usize,
}

#[derive(Debug, Serialize)]
pub struct AllFundsResponse {
    pub funds: Vec<FundStatusResponse>,
    pub totals: AggregateTotals,
    pub timestamp: String,
}

async fn get_funds_all(State(state): State<AppState>) -> Json<AllFundsResponse> {
    let funds: Vec<FundStatusResponse> = state.runtimes.iter().map(|r| fund_response(r)).collect();

    let totals = AggregateTotals {
        capital_usd: funds.iter().map(|f| f.status.capital_usd).sum(),
        realized_pnl: funds.iter().map(|f| f.status.realized_pnl).sum(),
        unrealized_pnl: funds.iter().map(|f| f.unrealized_pnl).sum(),
        nav_usd: funds.iter().map(|f| f.nav_usd).sum(),
        open_positions: funds.iter().map(|f| f.status.open_positions).sum(),
    };

    Json(AllFundsResponse {
        funds,
        totals,
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<usize>,
}

async fn get_recent_executions(
    Query(params): Query<ExecutionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::models::ExecutionRecord>>, StatusCode> {
    let limit = params.limit.unwrap_or(100).min(1_000);
    state
        .analytics
        .recent_executions(limit)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct KillSwitchRequest {
    pub fund_id: String,
    pub engaged: bool,
}

#[derive(Debug, Serialize)]
pub struct KillSwitchResponse {
    pub fund_id: String,
    pub engaged: bool,
}

async fn post_fund_kill(
    State(state): State<AppState>,
    Json(request): Json<KillSwitchRequest>,
) -> Result<Json<KillSwitchResponse>, StatusCode> {
    let fund_state = state
        .registry
        .get(&request.fund_id)
        .ok_or(StatusCode::NOT_FOUND)?;
    fund_state.fund.risk.set_kill_switch(request.engaged);
    info!(
        fund = %request.fund_id,
        engaged = request.engaged,
        "kill switch toggled via API"
    );
    Ok(Json(KillSwitchResponse {
        fund_id: request.fund_id,
        engaged: request.engaged,
    }))
}
