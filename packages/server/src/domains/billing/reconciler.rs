//! The entitlement reconciler: billing events in, account rewrites out.
//!
//! Order of operations is fixed: verify the signature over the raw body,
//! parse, claim the event id, then apply exactly one transition for the
//! event's kind. The claim makes retried deliveries no-ops; the sequence
//! guard in the account store makes out-of-order deliveries harmless. A
//! claim whose transition fails to land is released again, so the
//! provider's retry gets a fresh attempt instead of a duplicate ack.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use super::events::{BillingEvent, BillingEventKind};
use super::signature;
use super::store::{BillingEventStore, Disposition, EventRecord};
use crate::domains::accounts::models::account::{month_after, AccountStatus};
use crate::domains::accounts::store::{AccountStore, EntitlementUpdate};
use crate::kernel::notifier::Notifier;

/// Terminal failures of webhook handling. Anything else acknowledges.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed billing event: {0}")]
    MalformedEvent(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::MalformedEvent(_) => "malformed_event",
            WebhookError::Internal(_) => "internal_error",
        }
    }
}

pub struct EntitlementReconciler {
    accounts: Arc<dyn AccountStore>,
    events: Arc<dyn BillingEventStore>,
    notifier: Arc<dyn Notifier>,
    webhook_secret: String,
}

impl EntitlementReconciler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        events: Arc<dyn BillingEventStore>,
        notifier: Arc<dyn Notifier>,
        webhook_secret: String,
    ) -> Self {
        Self {
            accounts,
            events,
            notifier,
            webhook_secret,
        }
    }

    /// Handle one delivery: raw body plus the presented signature.
    pub async fn handle(
        &self,
        raw_body: &[u8],
        presented_signature: &str,
    ) -> Result<Disposition, WebhookError> {
        if !signature::verify(&self.webhook_secret, raw_body, presented_signature) {
            return Err(WebhookError::InvalidSignature);
        }

        let event: BillingEvent = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::MalformedEvent(e.to_string()))?;

        let record = EventRecord {
            event_id: event.id.clone(),
            kind: event.kind.as_str().to_string(),
            account_email: Some(event.account_email.clone()),
            sequence: event.sequence.unwrap_or(0),
            payload: serde_json::from_slice(raw_body)
                .unwrap_or_else(|_| serde_json::Value::Null),
            disposition: Disposition::Applied,
            received_at: Utc::now(),
        };

        if !self.events.claim(&record).await.map_err(WebhookError::Internal)? {
            tracing::debug!(event_id = %event.id, "duplicate billing event acknowledged");
            return Ok(Disposition::Duplicate);
        }

        let disposition = match self.apply(&event).await {
            Ok(disposition) => disposition,
            Err(err) => {
                // The transition never landed. Free the id so the
                // provider's retry is not swallowed as a duplicate.
                if let Err(release_err) = self.events.release(&event.id).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %release_err,
                        "failed to release claim on unapplied event"
                    );
                }
                return Err(WebhookError::Internal(err));
            }
        };
        if disposition != Disposition::Applied {
            self.events
                .set_disposition(&event.id, disposition)
                .await
                .map_err(WebhookError::Internal)?;
        }

        tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            disposition = %disposition,
            "billing event settled"
        );
        Ok(disposition)
    }

    /// Exactly one account transition per event kind.
    async fn apply(&self, event: &BillingEvent) -> anyhow::Result<Disposition> {
        // Refunds never touch plan or status; the claimed row is the audit.
        if event.kind == BillingEventKind::ChargeRefunded {
            return Ok(Disposition::Audited);
        }

        let account = match self.accounts.find_by_email(&event.account_email).await? {
            Some(account) => account,
            None => {
                tracing::warn!(
                    event_id = %event.id,
                    email = %event.account_email,
                    "billing event for unknown account"
                );
                return Ok(Disposition::Orphaned);
            }
        };

        let now = Utc::now();
        let (update, detail) = match event.kind {
            BillingEventKind::SubscriptionCreated | BillingEventKind::SubscriptionUpdated => {
                let plan = event.data.plan.unwrap_or(account.plan);
                let period = match (event.data.period_start, event.data.period_end) {
                    (Some(start), Some(end)) => (start, end),
                    _ => (now, month_after(now)),
                };
                (
                    EntitlementUpdate {
                        plan: Some(plan),
                        status: Some(AccountStatus::Active),
                        quota_limit: Some(plan.limits().monthly),
                        period: Some(period),
                        reset_quota_used: true,
                        last_payment_at: None,
                    },
                    format!("subscription set to {plan}"),
                )
            }
            BillingEventKind::SubscriptionDeleted => (
                EntitlementUpdate {
                    status: Some(AccountStatus::Cancelled),
                    ..Default::default()
                },
                "subscription cancelled".to_string(),
            ),
            BillingEventKind::PaymentFailed => (
                EntitlementUpdate {
                    status: Some(AccountStatus::Suspended),
                    ..Default::default()
                },
                "suspended after failed payment".to_string(),
            ),
            BillingEventKind::PaymentSucceeded => (
                EntitlementUpdate {
                    last_payment_at: Some(now),
                    ..Default::default()
                },
                "payment received".to_string(),
            ),
            BillingEventKind::ChargeRefunded => unreachable!("handled above"),
        };

        let applied = self
            .accounts
            .apply_entitlement(account.id, event.sequence, &update)
            .await?;
        if !applied {
            return Ok(Disposition::Stale);
        }

        if let Err(err) = self
            .notifier
            .account_event(&event.account_email, event.kind.as_str(), &detail)
            .await
        {
            tracing::warn!(error = %err, "notification delivery failed");
        }

        Ok(Disposition::Applied)
    }
}
