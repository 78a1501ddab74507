//! Operator sessions with lazy idle expiry.
//!
//! Session id and CSRF token are distinct random values: the id travels in
//! an http-only cookie, the token in a header the browser cannot attach
//! automatically. Expiry is enforced at access time against an idle
//! timeout, refreshed on each successful access; the maintenance job sweeps
//! leftovers. Each session also carries its own short sliding request
//! window, far below any account ceiling, because operator bursts are
//! anomalous by definition.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::AdminGateError;

const SESSION_WINDOW: Duration = Duration::from_secs(60);
const SESSION_WINDOW_CEILING: usize = 100;

/// Operator-facing view of a session.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub id: String,
    pub csrf_token: String,
    pub operator: String,
    pub created_at: DateTime<Utc>,
}

struct SessionEntry {
    csrf_token: String,
    operator: String,
    created_at: DateTime<Utc>,
    last_seen: Instant,
    window: VecDeque<Instant>,
}

pub struct AdminSessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    idle_timeout: Duration,
}

impl AdminSessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Create a session for a verified operator. Id and CSRF token are
    /// independent random values.
    pub async fn create(&self, operator: &str) -> AdminSession {
        let session = AdminSession {
            id: Uuid::new_v4().to_string(),
            csrf_token: Uuid::new_v4().to_string(),
            operator: operator.to_string(),
            created_at: Utc::now(),
        };

        self.sessions.write().await.insert(
            session.id.clone(),
            SessionEntry {
                csrf_token: session.csrf_token.clone(),
                operator: session.operator.clone(),
                created_at: session.created_at,
                last_seen: Instant::now(),
                window: VecDeque::new(),
            },
        );

        session
    }

    /// Authorize one access. Expiry first, then the per-session window,
    /// then the CSRF pairing when the caller is mutating state. A
    /// successful access refreshes the idle clock.
    pub async fn access(
        &self,
        session_id: &str,
        csrf_token: Option<&str>,
    ) -> Result<AdminSession, AdminGateError> {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let entry = match sessions.get_mut(session_id) {
            Some(entry) => entry,
            None => return Err(AdminGateError::SessionExpired),
        };

        if now.duration_since(entry.last_seen) >= self.idle_timeout {
            sessions.remove(session_id);
            return Err(AdminGateError::SessionExpired);
        }

        while let Some(oldest) = entry.window.front() {
            if now.duration_since(*oldest) >= SESSION_WINDOW {
                entry.window.pop_front();
            } else {
                break;
            }
        }
        if entry.window.len() >= SESSION_WINDOW_CEILING {
            let retry_after = entry
                .window
                .front()
                .map(|oldest| SESSION_WINDOW.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or_default();
            return Err(AdminGateError::AdminRateLimited {
                retry_after_secs: (retry_after.as_secs_f64().ceil() as u64).max(1),
            });
        }

        if let Some(presented) = csrf_token {
            if presented != entry.csrf_token {
                return Err(AdminGateError::CsrfMismatch);
            }
        }

        entry.window.push_back(now);
        entry.last_seen = now;

        Ok(AdminSession {
            id: session_id.to_string(),
            csrf_token: entry.csrf_token.clone(),
            operator: entry.operator.clone(),
            created_at: entry.created_at,
        })
    }

    pub async fn destroy(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Drop idle-expired sessions (housekeeping). Returns how many.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        before - sessions.len()
    }

    #[cfg(test)]
    pub(crate) async fn backdate_last_seen(&self, session_id: &str, by: Duration) {
        if let Some(entry) = self.sessions.write().await.get_mut(session_id) {
            entry.last_seen = Instant::now() - by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AdminSessionStore {
        AdminSessionStore::new(Duration::from_secs(30 * 60))
    }

    #[tokio::test]
    async fn csrf_token_is_not_the_session_id() {
        let session = store().create("ops").await;
        assert_ne!(session.id, session.csrf_token);
    }

    #[tokio::test]
    async fn read_access_needs_no_csrf_but_mutation_needs_a_match() {
        let store = store();
        let session = store.create("ops").await;

        assert!(store.access(&session.id, None).await.is_ok());
        assert!(store
            .access(&session.id, Some(&session.csrf_token))
            .await
            .is_ok());

        let err = store
            .access(&session.id, Some("wrong-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminGateError::CsrfMismatch));
    }

    #[tokio::test]
    async fn idle_sessions_expire_lazily_on_access() {
        let store = store();
        let session = store.create("ops").await;
        store
            .backdate_last_seen(&session.id, Duration::from_secs(31 * 60))
            .await;

        let err = store.access(&session.id, None).await.unwrap_err();
        assert!(matches!(err, AdminGateError::SessionExpired));
        // The expired entry is gone, not just rejected.
        assert_eq!(store.sessions.read().await.len(), 0);
    }

    #[tokio::test]
    async fn access_refreshes_the_idle_clock() {
        let store = AdminSessionStore::new(Duration::from_millis(80));
        let session = store.create("ops").await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(store.access(&session.id, None).await.is_ok());
        }
    }

    #[tokio::test]
    async fn the_per_session_window_caps_bursts() {
        let store = store();
        let session = store.create("ops").await;

        for _ in 0..SESSION_WINDOW_CEILING {
            store.access(&session.id, None).await.unwrap();
        }

        match store.access(&session.id, None).await.unwrap_err() {
            AdminGateError::AdminRateLimited { retry_after_secs } => {
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected AdminRateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn destroyed_sessions_stop_resolving() {
        let store = store();
        let session = store.create("ops").await;
        store.destroy(&session.id).await;

        assert!(matches!(
            store.access(&session.id, None).await.unwrap_err(),
            AdminGateError::SessionExpired
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let store = store();
        let live = store.create("ops").await;
        let idle = store.create("ops").await;
        store
            .backdate_last_seen(&idle.id, Duration::from_secs(60 * 60))
            .await;

        assert_eq!(store.sweep_expired().await, 1);
        assert!(store.access(&live.id, None).await.is_ok());
    }
}
