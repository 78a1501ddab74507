use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One row per admission attempt.
///
/// Identity fields are optional because a request can terminate before any
/// account is known (bad credential). `outcome` holds the stable kind
/// string of the rejection, or `admitted`; `gate` names the stage that
/// settled it.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub id: Uuid,
    pub account_id: Option<Uuid>,
    pub email: Option<String>,
    pub credential_prefix: Option<String>,
    pub endpoint: String,
    pub target_url: Option<String>,
    pub outcome: String,
    pub gate: String,
    pub status_code: i32,
    pub cached: bool,
    pub duration_ms: i64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome string recorded for successful admissions.
pub const OUTCOME_ADMITTED: &str = "admitted";

/// Aggregates over a window of usage records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub cached_requests: i64,
    pub avg_duration_ms: f64,
}

/// System-wide aggregates for the operator dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SystemStats {
    #[serde(flatten)]
    pub stats: UsageStats,
    /// Distinct accounts seen in the window.
    pub active_accounts: i64,
}
