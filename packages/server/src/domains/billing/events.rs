//! Billing-provider event envelope.
//!
//! Events arrive at-least-once, possibly duplicated, possibly out of order.
//! The provider id is the idempotency key; the provider sequence orders
//! competing deliveries for one account.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::common::plans::PlanTier;

/// The closed set of event kinds the reconciler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventKind {
    #[serde(rename = "subscription.created")]
    SubscriptionCreated,
    #[serde(rename = "subscription.updated")]
    SubscriptionUpdated,
    #[serde(rename = "subscription.deleted")]
    SubscriptionDeleted,
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "charge.refunded")]
    ChargeRefunded,
}

impl BillingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventKind::SubscriptionCreated => "subscription.created",
            BillingEventKind::SubscriptionUpdated => "subscription.updated",
            BillingEventKind::SubscriptionDeleted => "subscription.deleted",
            BillingEventKind::PaymentSucceeded => "payment.succeeded",
            BillingEventKind::PaymentFailed => "payment.failed",
            BillingEventKind::ChargeRefunded => "charge.refunded",
        }
    }
}

impl fmt::Display for BillingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingEventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription.created" => Ok(BillingEventKind::SubscriptionCreated),
            "subscription.updated" => Ok(BillingEventKind::SubscriptionUpdated),
            "subscription.deleted" => Ok(BillingEventKind::SubscriptionDeleted),
            "payment.succeeded" => Ok(BillingEventKind::PaymentSucceeded),
            "payment.failed" => Ok(BillingEventKind::PaymentFailed),
            "charge.refunded" => Ok(BillingEventKind::ChargeRefunded),
            other => Err(anyhow!("unknown billing event kind: {other}")),
        }
    }
}

/// Subscription details carried by creation and update events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingEventData {
    pub plan: Option<PlanTier>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// One delivery from the billing provider, as parsed off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Provider-assigned id; applied to account state at most once.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BillingEventKind,
    /// Provider sequence; a lower sequence never overwrites a higher one.
    /// Not every event carries one, and those that do not are applied as
    /// they arrive.
    #[serde(default)]
    pub sequence: Option<i64>,
    pub account_email: String,
    #[serde(default)]
    pub data: BillingEventData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_subscription_update_off_the_wire() {
        let event: BillingEvent = serde_json::from_str(
            r#"{
                "id": "evt_123",
                "type": "subscription.updated",
                "sequence": 7,
                "account_email": "caller@example.com",
                "data": {"plan": "pro", "period_start": "2026-08-01T00:00:00Z", "period_end": "2026-09-01T00:00:00Z"}
            }"#,
        )
        .unwrap();

        assert_eq!(event.kind, BillingEventKind::SubscriptionUpdated);
        assert_eq!(event.sequence, Some(7));
        assert_eq!(event.data.plan, Some(PlanTier::Pro));
    }

    #[test]
    fn sequence_and_data_default_when_absent() {
        let event: BillingEvent = serde_json::from_str(
            r#"{"id": "evt_1", "type": "payment.failed", "account_email": "a@b.c"}"#,
        )
        .unwrap();
        assert_eq!(event.sequence, None);
        assert!(event.data.plan.is_none());
    }

    #[test]
    fn kind_round_trips_through_its_wire_form() {
        for kind in [
            BillingEventKind::SubscriptionCreated,
            BillingEventKind::SubscriptionUpdated,
            BillingEventKind::SubscriptionDeleted,
            BillingEventKind::PaymentSucceeded,
            BillingEventKind::PaymentFailed,
            BillingEventKind::ChargeRefunded,
        ] {
            assert_eq!(kind.as_str().parse::<BillingEventKind>().unwrap(), kind);
        }
        assert!("invoice.finalized".parse::<BillingEventKind>().is_err());
    }
}
