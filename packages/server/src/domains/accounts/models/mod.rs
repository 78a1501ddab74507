pub mod account;

pub use account::{Account, AccountStatus, AccountView};
