// Business domains
pub mod accounts;
pub mod admin;
pub mod admission;
pub mod billing;
pub mod usage;
