//! Accounts domain - credentialed accounts, their plans, and quota counters
//!
//! The account row is the unit of enforcement: the credential validator
//! resolves a presented secret to it, the quota ledger consumes from it,
//! and the entitlement reconciler rewrites it when billing says so.

pub mod credentials;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use credentials::CredentialValidator;
pub use models::account::{month_after, Account, AccountStatus, AccountView};
pub use store::{
    AccountFilter, AccountPage, AccountStore, EntitlementUpdate, MemoryAccountStore,
    PgAccountStore, QuotaConsume,
};
