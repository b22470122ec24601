// In crates/web-server/src/types.rs

use engine::HealthReport;
use risk::RiskSnapshot;
use serde::{Deserialize, Serialize};

/// Body of `GET /api/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub venue: &'static str,
    pub emergency_stop: bool,
    pub health: HealthReport,
    pub risk: RiskSnapshot,
}

/// Query parameters for `GET /api/events` (e.g., ?limit=20).
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize { 50 }

pub const MAX_EVENTS: usize = 500;

/// Body of the control endpoints.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub emergency_stop: bool,
    pub halted: Option<String>,
}
