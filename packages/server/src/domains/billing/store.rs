//! Billing-event ledger: idempotency claims plus audit trail.
//!
//! Claiming an event id is the idempotency barrier: the first delivery
//! inserts the row and wins, every retry after that sees the existing row
//! and becomes a no-op. Rows also record what became of each event and are
//! pruned once the provider's retry window has passed.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

/// What the reconciler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The transition was applied to the account.
    Applied,
    /// The id was already claimed; acknowledged without reapplying.
    Duplicate,
    /// A newer sequence had already been applied; recorded, not applied.
    Stale,
    /// Audit-only kind (refunds); recorded, no account change.
    Audited,
    /// Subject account unknown; recorded so the provider stops retrying.
    Orphaned,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Applied => "applied",
            Disposition::Duplicate => "duplicate",
            Disposition::Stale => "stale",
            Disposition::Audited => "audited",
            Disposition::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Disposition::Applied),
            "duplicate" => Ok(Disposition::Duplicate),
            "stale" => Ok(Disposition::Stale),
            "audited" => Ok(Disposition::Audited),
            "orphaned" => Ok(Disposition::Orphaned),
            other => Err(anyhow!("unknown event disposition: {other}")),
        }
    }
}

/// Persisted form of one delivered event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: String,
    pub kind: String,
    pub account_email: Option<String>,
    pub sequence: i64,
    pub payload: serde_json::Value,
    pub disposition: Disposition,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait BillingEventStore: Send + Sync {
    /// Claim the event id. Returns false when the id was already claimed,
    /// in which case nothing is written.
    async fn claim(&self, record: &EventRecord) -> Result<bool>;

    /// Rewrite the disposition of a claimed event.
    async fn set_disposition(&self, event_id: &str, disposition: Disposition) -> Result<()>;

    /// Drop the claim on an event id. A later delivery of the same id can
    /// then claim it afresh.
    async fn release(&self, event_id: &str) -> Result<()>;

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>>;

    /// Delete events received before `cutoff`. Returns how many went away.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct PgBillingEventStore {
    pool: PgPool,
}

impl PgBillingEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    kind: String,
    account_email: Option<String>,
    sequence: i64,
    payload: serde_json::Value,
    disposition: String,
    received_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(EventRecord {
            event_id: row.event_id,
            kind: row.kind,
            account_email: row.account_email,
            sequence: row.sequence,
            payload: row.payload,
            disposition: row.disposition.parse()?,
            received_at: row.received_at,
        })
    }
}

#[async_trait]
impl BillingEventStore for PgBillingEventStore {
    async fn claim(&self, record: &EventRecord) -> Result<bool> {
        // The primary key on event_id makes the claim atomic; a retried
        // delivery hits the conflict and claims nothing.
        let result = sqlx::query(
            "INSERT INTO billing_events
                (event_id, kind, account_email, sequence, payload, disposition, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&record.event_id)
        .bind(&record.kind)
        .bind(&record.account_email)
        .bind(record.sequence)
        .bind(&record.payload)
        .bind(record.disposition.as_str())
        .bind(record.received_at)
        .execute(&self.pool)
        .await
        .context("failed to claim billing event")?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_disposition(&self, event_id: &str, disposition: Disposition) -> Result<()> {
        sqlx::query("UPDATE billing_events SET disposition = $2 WHERE event_id = $1")
            .bind(event_id)
            .bind(disposition.as_str())
            .execute(&self.pool)
            .await
            .context("failed to update event disposition")?;

        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM billing_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .context("failed to release billing event claim")?;

        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>> {
        let row =
            sqlx::query_as::<_, EventRow>("SELECT * FROM billing_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load billing event")?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM billing_events WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to prune billing events")?;

        Ok(result.rows_affected())
    }
}

/// In-memory event ledger for tests and single-process development.
#[derive(Default)]
pub struct MemoryBillingEventStore {
    events: Arc<RwLock<HashMap<String, EventRecord>>>,
}

impl MemoryBillingEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingEventStore for MemoryBillingEventStore {
    async fn claim(&self, record: &EventRecord) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&record.event_id) {
            return Ok(false);
        }
        events.insert(record.event_id.clone(), record.clone());
        Ok(true)
    }

    async fn set_disposition(&self, event_id: &str, disposition: Disposition) -> Result<()> {
        if let Some(record) = self.events.write().await.get_mut(event_id) {
            record.disposition = disposition;
        }
        Ok(())
    }

    async fn release(&self, event_id: &str) -> Result<()> {
        self.events.write().await.remove(event_id);
        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventRecord>> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|_, record| record.received_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> EventRecord {
        EventRecord {
            event_id: id.to_string(),
            kind: "subscription.updated".to_string(),
            account_email: Some("caller@example.com".to_string()),
            sequence: 1,
            payload: serde_json::json!({"id": id}),
            disposition: Disposition::Applied,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn an_id_claims_once() {
        let store = MemoryBillingEventStore::new();
        assert!(store.claim(&record("evt_1")).await.unwrap());
        assert!(!store.claim(&record("evt_1")).await.unwrap());
        assert!(store.claim(&record("evt_2")).await.unwrap());
    }

    #[tokio::test]
    async fn disposition_rewrites_stick() {
        let store = MemoryBillingEventStore::new();
        store.claim(&record("evt_1")).await.unwrap();
        store
            .set_disposition("evt_1", Disposition::Stale)
            .await
            .unwrap();

        let found = store.find("evt_1").await.unwrap().unwrap();
        assert_eq!(found.disposition, Disposition::Stale);
    }

    #[tokio::test]
    async fn a_released_id_claims_again() {
        let store = MemoryBillingEventStore::new();
        assert!(store.claim(&record("evt_1")).await.unwrap());

        store.release("evt_1").await.unwrap();
        assert!(store.find("evt_1").await.unwrap().is_none());
        assert!(store.claim(&record("evt_1")).await.unwrap());
    }

    #[tokio::test]
    async fn prune_respects_the_retention_cutoff() {
        let store = MemoryBillingEventStore::new();
        let mut old = record("evt_old");
        old.received_at = Utc::now() - chrono::Duration::days(60);
        store.claim(&old).await.unwrap();
        store.claim(&record("evt_new")).await.unwrap();

        let pruned = store
            .prune_before(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();

        assert_eq!(pruned, 1);
        assert!(store.find("evt_old").await.unwrap().is_none());
        assert!(store.find("evt_new").await.unwrap().is_some());
    }
}
