//! Credential issuance and validation.
//!
//! Secrets are shown to the caller exactly once at issue or rotation time;
//! the store only ever sees a salted SHA-256 digest plus a short display
//! prefix. Validation is the first admission gate.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::models::account::{Account, AccountStatus};
use super::store::AccountStore;
use crate::domains::admission::error::AdmissionError;

/// Issued secrets look like `cg_<43 url-safe chars>`.
pub const CREDENTIAL_PREFIX: &str = "cg_";
const PREFIX_DISPLAY_LEN: usize = 10;

/// Generate a fresh credential secret.
pub fn generate_credential() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "{CREDENTIAL_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Salted SHA-256 hex digest of the full secret; the only form that
/// touches disk.
pub fn digest_credential(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Display prefix stored alongside the digest so operators and usage rows
/// can name a credential without revealing it.
pub fn display_prefix(secret: &str) -> String {
    secret.chars().take(PREFIX_DISPLAY_LEN).collect()
}

fn plausible_shape(secret: &str) -> bool {
    secret.starts_with(CREDENTIAL_PREFIX) && secret.len() >= 20
}

/// Resolves a presented secret to its account and applies status policy.
pub struct CredentialValidator {
    accounts: Arc<dyn AccountStore>,
    salt: String,
}

impl CredentialValidator {
    pub fn new(accounts: Arc<dyn AccountStore>, salt: String) -> Self {
        Self { accounts, salt }
    }

    /// The credential gate: digest lookup first, status policy second.
    ///
    /// The last-used touch is spawned off the request path; losing it is
    /// tolerable, blocking admission on it is not.
    pub async fn validate(&self, presented: &str) -> Result<Account, AdmissionError> {
        if !plausible_shape(presented) {
            return Err(AdmissionError::InvalidCredential);
        }

        let digest = digest_credential(&self.salt, presented);
        let account = self
            .accounts
            .find_by_credential_hash(&digest)
            .await
            .map_err(|e| AdmissionError::StoreUnavailable(e.to_string()))?
            .ok_or(AdmissionError::InvalidCredential)?;

        match account.status {
            AccountStatus::Active => {}
            AccountStatus::Blocked => {
                return Err(AdmissionError::AccountBlocked {
                    reason: account
                        .block_reason
                        .clone()
                        .unwrap_or_else(|| "policy violation".to_string()),
                });
            }
            AccountStatus::Suspended => return Err(AdmissionError::AccountSuspended),
            // A cancelled account's credential behaves as if it never existed.
            AccountStatus::Cancelled => return Err(AdmissionError::InvalidCredential),
        }

        let store = Arc::clone(&self.accounts);
        let id = account.id;
        tokio::spawn(async move {
            if let Err(err) = store.touch_last_used(id, Utc::now()).await {
                tracing::debug!(account_id = %id, error = %err, "last-used touch failed");
            }
        });

        Ok(account)
    }
}
