//! Monthly quota ledger.
//!
//! All counter arithmetic happens inside the account store's atomic
//! consume; this layer translates outcomes for the pipeline. A store
//! failure is a rejection, never a free pass.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::error::AdmissionError;
use crate::domains::accounts::store::{AccountStore, QuotaConsume};

/// What a successful consume tells the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGrant {
    pub remaining: i64,
    pub limit: i64,
}

pub struct QuotaLedger {
    accounts: Arc<dyn AccountStore>,
}

impl QuotaLedger {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// Consume one unit for this account or reject.
    pub async fn check_and_consume(&self, account_id: Uuid) -> Result<QuotaGrant, AdmissionError> {
        match self.accounts.consume_quota(account_id, Utc::now()).await {
            Ok(QuotaConsume::Admitted { used, limit, .. }) => Ok(QuotaGrant {
                remaining: (limit - used).max(0),
                limit,
            }),
            Ok(QuotaConsume::Exhausted { limit, resets_at }) => {
                Err(AdmissionError::QuotaExceeded { limit, resets_at })
            }
            Err(err) => Err(AdmissionError::StoreUnavailable(err.to_string())),
        }
    }
}
