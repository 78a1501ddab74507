//! Failures of the admin session gate.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AdminGateError {
    #[error("invalid operator credentials")]
    InvalidLogin,

    #[error("session missing or expired")]
    SessionExpired,

    #[error("anti-forgery token missing or mismatched")]
    CsrfMismatch,

    #[error("admin rate limit exceeded, retry in {retry_after_secs}s")]
    AdminRateLimited { retry_after_secs: u64 },
}

impl AdminGateError {
    /// Stable kind string used in admin response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            AdminGateError::InvalidLogin => "invalid_login",
            AdminGateError::SessionExpired => "session_expired",
            AdminGateError::CsrfMismatch => "csrf_mismatch",
            AdminGateError::AdminRateLimited { .. } => "admin_rate_limited",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AdminGateError::InvalidLogin | AdminGateError::SessionExpired => 401,
            AdminGateError::CsrfMismatch => 403,
            AdminGateError::AdminRateLimited { .. } => 429,
        }
    }
}
