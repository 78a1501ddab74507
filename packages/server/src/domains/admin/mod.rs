//! Admin domain - the session gate in front of privileged operations
//!
//! Operators are few and their traffic is small; everything here is
//! in-process state. Block, unblock, delete, and provisioning run through
//! this gate; the accounts they mutate live in the accounts domain.

pub mod error;
pub mod gate;
pub mod session;

// Re-export commonly used types
pub use error::AdminGateError;
pub use gate::AdminGate;
pub use session::{AdminSession, AdminSessionStore};
