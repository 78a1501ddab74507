//! Usage domain - the append-only audit trail behind admission
//!
//! Exactly one record per admission attempt, whatever the outcome. Records
//! feed the self-service stats endpoint, the operator dashboard numbers,
//! and nothing else; enforcement state lives on the account row.

pub mod models;
pub mod store;

// Re-export commonly used types
pub use models::usage_record::{SystemStats, UsageRecord, UsageStats, OUTCOME_ADMITTED};
pub use store::{MemoryUsageStore, PgUsageStore, UsageStore};
