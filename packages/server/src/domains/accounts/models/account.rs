use anyhow::anyhow;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::common::plans::PlanTier;

/// Lifecycle state of an account.
///
/// `Blocked` is an operator decision and carries a reason; `Suspended` and
/// `Cancelled` arrive from billing. Only `Active` accounts pass admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Blocked,
    Suspended,
    Cancelled,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "blocked" => Ok(AccountStatus::Blocked),
            "suspended" => Ok(AccountStatus::Suspended),
            "cancelled" => Ok(AccountStatus::Cancelled),
            other => Err(anyhow!("unknown account status: {other}")),
        }
    }
}

/// Account model - the unit of admission enforcement
///
/// Stores only the credential digest and a short display prefix, never the
/// secret itself. Quota counters live on the row so consumption and billing
/// rewrites hit the same record atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub plan: PlanTier,
    pub status: AccountStatus,
    pub credential_hash: String,
    pub credential_prefix: String,
    pub block_reason: Option<String>,
    pub quota_used: i64,
    pub quota_limit: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub last_event_seq: i64,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Build a fresh active account on the given plan.
    pub fn provision(
        email: String,
        plan: PlanTier,
        credential_hash: String,
        credential_prefix: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            plan,
            status: AccountStatus::Active,
            credential_hash,
            credential_prefix,
            block_reason: None,
            quota_used: 0,
            quota_limit: plan.limits().monthly,
            period_start: now,
            period_end: month_after(now),
            last_event_seq: 0,
            last_payment_at: None,
            created_at: now,
            last_used_at: None,
        }
    }

    /// Requests left in the current period, clamped at zero.
    pub fn quota_remaining(&self) -> i64 {
        (self.quota_limit - self.quota_used).max(0)
    }
}

/// One calendar month past `ts`, falling back to 30 days at the range edge.
pub fn month_after(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.checked_add_months(Months::new(1))
        .unwrap_or_else(|| ts + chrono::Duration::days(30))
}

/// Wire-safe projection of an account: everything but the credential digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub plan: PlanTier,
    pub status: AccountStatus,
    pub credential_prefix: String,
    pub block_reason: Option<String>,
    pub quota_used: i64,
    pub quota_limit: i64,
    pub quota_remaining: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            plan: account.plan,
            status: account.status,
            credential_prefix: account.credential_prefix.clone(),
            block_reason: account.block_reason.clone(),
            quota_used: account.quota_used,
            quota_limit: account.quota_limit,
            quota_remaining: account.quota_remaining(),
            period_start: account.period_start,
            period_end: account.period_end,
            created_at: account.created_at,
            last_used_at: account.last_used_at,
        }
    }
}

/// Raw row shape for sqlx; plan and status stay TEXT in the database.
#[derive(sqlx::FromRow, Debug)]
pub(crate) struct AccountRow {
    pub id: Uuid,
    pub email: String,
    pub plan: String,
    pub status: String,
    pub credential_hash: String,
    pub credential_prefix: String,
    pub block_reason: Option<String>,
    pub quota_used: i64,
    pub quota_limit: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub last_event_seq: i64,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            email: row.email,
            plan: row.plan.parse()?,
            status: row.status.parse()?,
            credential_hash: row.credential_hash,
            credential_prefix: row.credential_prefix,
            block_reason: row.block_reason,
            quota_used: row.quota_used,
            quota_limit: row.quota_limit,
            period_start: row.period_start,
            period_end: row.period_end,
            last_event_seq: row.last_event_seq,
            last_payment_at: row.last_payment_at,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
        })
    }
}
