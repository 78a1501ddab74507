// Common types and utilities shared across the application

pub mod plans;

pub use plans::{PlanLimits, PlanTier};
