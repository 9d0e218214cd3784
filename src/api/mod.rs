//! Read-only status surface plus the kill-switch toggle.

pub mod routes;

pub use routes::router;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::analytics::AnalyticsClient;
use crate::orchestrator::FundRuntime;
use crate::registry::FundRegistry;

/// Application state shared with the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtimes: Arc<Vec<Arc<FundRuntime>>>,
    pub registry: Arc<FundRegistry>,
    pub analytics: Arc<dyn AnalyticsClient>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn runtime(&self, fund_id: &str) -> Option<&Arc<FundRuntime>> {
        self.runtimes.iter().find(|r| r.fund.id == fund_id)
    }
}
