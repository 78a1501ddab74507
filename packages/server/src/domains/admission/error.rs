//! The single terminal error type for the admission pipeline.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Pipeline stage a terminal outcome is attributed to, as recorded in the
/// usage trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    Credential,
    RateLimit,
    Quota,
    Plan,
    Cache,
    Origin,
}

impl GateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStage::Credential => "credential",
            GateStage::RateLimit => "rate_limit",
            GateStage::Quota => "quota",
            GateStage::Plan => "plan",
            GateStage::Cache => "cache",
            GateStage::Origin => "origin",
        }
    }
}

/// Every way an admission attempt can terminate short of success.
///
/// Kind strings are wire-stable; clients and the usage trail key off them,
/// so variants carry exactly the fields their envelope needs.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    #[error("invalid or unknown credential")]
    InvalidCredential,

    #[error("account blocked: {reason}")]
    AccountBlocked { reason: String },

    #[error("account suspended pending payment")]
    AccountSuspended,

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("monthly quota of {limit} exhausted")]
    QuotaExceeded {
        limit: i64,
        resets_at: DateTime<Utc>,
    },

    #[error("current plan does not include {feature}")]
    PlanForbidden { feature: String },

    #[error("target not found: {0}")]
    NotFound(String),

    #[error("origin extraction failed: {0}")]
    OriginFailed(String),

    #[error("admission dependency unavailable: {0}")]
    StoreUnavailable(String),
}

impl AdmissionError {
    /// Stable kind string used in responses and usage records.
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::InvalidCredential => "invalid_credential",
            AdmissionError::AccountBlocked { .. } => "account_blocked",
            AdmissionError::AccountSuspended => "account_suspended",
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::QuotaExceeded { .. } => "quota_exceeded",
            AdmissionError::PlanForbidden { .. } => "plan_forbidden",
            AdmissionError::NotFound(_) => "not_found",
            AdmissionError::OriginFailed(_) => "origin_failed",
            AdmissionError::StoreUnavailable(_) => "quota_unavailable",
        }
    }

    /// Pipeline stage this rejection is attributed to in the usage trail.
    pub fn gate(&self) -> GateStage {
        match self {
            AdmissionError::InvalidCredential
            | AdmissionError::AccountBlocked { .. }
            | AdmissionError::AccountSuspended => GateStage::Credential,
            AdmissionError::RateLimited { .. } => GateStage::RateLimit,
            AdmissionError::QuotaExceeded { .. } | AdmissionError::StoreUnavailable(_) => {
                GateStage::Quota
            }
            AdmissionError::PlanForbidden { .. } => GateStage::Plan,
            AdmissionError::NotFound(_) | AdmissionError::OriginFailed(_) => GateStage::Origin,
        }
    }

    /// HTTP status the rejection envelope is sent with.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::InvalidCredential => 401,
            AdmissionError::AccountBlocked { .. }
            | AdmissionError::AccountSuspended
            | AdmissionError::PlanForbidden { .. } => 403,
            AdmissionError::RateLimited { .. } => 429,
            AdmissionError::QuotaExceeded { .. } => 402,
            AdmissionError::NotFound(_) => 404,
            AdmissionError::OriginFailed(_) => 502,
            AdmissionError::StoreUnavailable(_) => 503,
        }
    }
}
