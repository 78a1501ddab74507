//! Admission domain - the gate pipeline in front of the origin
//!
//! A request passes credential, rate, and quota gates in that fixed order,
//! then the cache, and only then the origin. The coordinator drives the
//! pipeline as an explicit state machine and emits exactly one usage record
//! per attempt, whatever the outcome.

pub mod coordinator;
pub mod error;
pub mod quota;
pub mod rate_limiter;

// Re-export commonly used types
pub use coordinator::{AdmissionCoordinator, AdmissionRequest, AdmissionSuccess, RequestContext};
pub use error::{AdmissionError, GateStage};
pub use quota::{QuotaGrant, QuotaLedger};
pub use rate_limiter::{RateDecision, RateLimiter};
