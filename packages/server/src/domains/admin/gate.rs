//! The admin gate: operator login and per-request authorization.
//!
//! Login compares SHA-256 digests of the configured operator credentials so
//! the comparison does not short-circuit on the first differing byte of the
//! secret itself. Authorization policy: reads need a live session, mutations
//! additionally need the CSRF token, transmitted outside the session cookie.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::error::AdminGateError;
use super::session::{AdminSession, AdminSessionStore};

pub struct AdminGate {
    sessions: Arc<AdminSessionStore>,
    username: String,
    password_digest: [u8; 32],
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

impl AdminGate {
    pub fn new(sessions: Arc<AdminSessionStore>, username: String, password: String) -> Self {
        Self {
            sessions,
            username,
            password_digest: digest(&password),
        }
    }

    /// Verify operator credentials and open a session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AdminSession, AdminGateError> {
        if username != self.username || digest(password) != self.password_digest {
            return Err(AdminGateError::InvalidLogin);
        }

        let session = self.sessions.create(username).await;
        tracing::info!(operator = %username, "admin session opened");
        Ok(session)
    }

    /// Authorize a read: live session required, no CSRF pairing.
    pub async fn authorize_read(&self, session_id: &str) -> Result<AdminSession, AdminGateError> {
        self.sessions.access(session_id, None).await
    }

    /// Authorize a mutation: live session plus matching CSRF token. A
    /// missing token is a mismatch, not a lesser error.
    pub async fn authorize_mutation(
        &self,
        session_id: &str,
        csrf_token: Option<&str>,
    ) -> Result<AdminSession, AdminGateError> {
        let token = csrf_token.ok_or(AdminGateError::CsrfMismatch)?;
        self.sessions.access(session_id, Some(token)).await
    }

    pub async fn logout(&self, session_id: &str) {
        self.sessions.destroy(session_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gate() -> AdminGate {
        AdminGate::new(
            Arc::new(AdminSessionStore::new(Duration::from_secs(30 * 60))),
            "ops".to_string(),
            "correct horse battery".to_string(),
        )
    }

    #[tokio::test]
    async fn login_accepts_only_the_configured_operator() {
        let gate = gate();

        assert!(gate.login("ops", "correct horse battery").await.is_ok());
        assert!(matches!(
            gate.login("ops", "wrong").await.unwrap_err(),
            AdminGateError::InvalidLogin
        ));
        assert!(matches!(
            gate.login("intruder", "correct horse battery").await.unwrap_err(),
            AdminGateError::InvalidLogin
        ));
    }

    #[tokio::test]
    async fn mutations_without_a_token_are_csrf_mismatches() {
        let gate = gate();
        let session = gate.login("ops", "correct horse battery").await.unwrap();

        assert!(gate.authorize_read(&session.id).await.is_ok());
        assert!(matches!(
            gate.authorize_mutation(&session.id, None).await.unwrap_err(),
            AdminGateError::CsrfMismatch
        ));
        assert!(gate
            .authorize_mutation(&session.id, Some(&session.csrf_token))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn logout_closes_the_session() {
        let gate = gate();
        let session = gate.login("ops", "correct horse battery").await.unwrap();

        gate.logout(&session.id).await;
        assert!(matches!(
            gate.authorize_read(&session.id).await.unwrap_err(),
            AdminGateError::SessionExpired
        ));
    }
}
