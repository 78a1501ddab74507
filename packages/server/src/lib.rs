// Clipgate - Admission Control Core
//
// This crate provides the gateway fronting the metered media-extraction API:
// credential checks, rate limiting, quota accounting, response caching,
// billing reconciliation, and the operator surface.
//
// The admission pipeline lives in domains/admission; everything it gates on
// (accounts, usage, billing) is a sibling domain.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
