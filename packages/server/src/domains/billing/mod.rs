//! Billing domain - entitlement reconciliation from provider events
//!
//! Runs entirely off the request path. Events arrive signed and
//! at-least-once; each one changes account state at most once, in provider
//! sequence order.

pub mod events;
pub mod reconciler;
pub mod signature;
pub mod store;

// Re-export commonly used types
pub use events::{BillingEvent, BillingEventData, BillingEventKind};
pub use reconciler::{EntitlementReconciler, WebhookError};
pub use store::{
    BillingEventStore, Disposition, EventRecord, MemoryBillingEventStore, PgBillingEventStore,
};
