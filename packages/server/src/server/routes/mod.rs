pub mod account;
pub mod admin;
pub mod billing;
pub mod extract;
pub mod health;
