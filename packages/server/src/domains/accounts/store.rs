//! Account persistence behind a swappable store seam.
//!
//! Two implementations: `PgAccountStore` for production and
//! `MemoryAccountStore` for tests and single-process development. Quota
//! consumption and entitlement rewrites are atomic in both, which is what
//! the admission pipeline and the reconciler lean on.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::account::{month_after, Account, AccountRow, AccountStatus};
use crate::common::plans::PlanTier;

/// Result of one atomic quota consumption.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaConsume {
    Admitted {
        used: i64,
        limit: i64,
        period_end: DateTime<Utc>,
    },
    Exhausted {
        limit: i64,
        resets_at: DateTime<Utc>,
    },
}

/// Billing-driven rewrite of account entitlements.
///
/// Fields left as None keep their current value. The whole update lands in
/// one write together with the event sequence that justified it, guarded by
/// `last_event_seq < seq` so stale deliveries cannot clobber newer state.
#[derive(Debug, Clone, Default)]
pub struct EntitlementUpdate {
    pub plan: Option<PlanTier>,
    pub status: Option<AccountStatus>,
    pub quota_limit: Option<i64>,
    pub period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub reset_quota_used: bool,
    pub last_payment_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub plan: Option<PlanTier>,
    pub status: Option<AccountStatus>,
}

#[derive(Debug, Clone)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    pub total: i64,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: &Account) -> Result<Account>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Lookup by credential digest. The validator never passes the raw
    /// secret down here.
    async fn find_by_credential_hash(&self, digest: &str) -> Result<Option<Account>>;

    async fn list(&self, filter: &AccountFilter, page: i64, per_page: i64)
        -> Result<AccountPage>;

    async fn count(&self, filter: &AccountFilter) -> Result<i64>;

    /// Atomically roll the period forward if it lapsed, then consume one
    /// unit of quota if any remains. Never splits the rollover from the
    /// consume check.
    async fn consume_quota(&self, id: Uuid, now: DateTime<Utc>) -> Result<QuotaConsume>;

    /// Replace the stored digest and display prefix in one write. The old
    /// secret stops resolving the moment this returns.
    async fn rotate_credential(&self, id: Uuid, digest: &str, prefix: &str) -> Result<()>;

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        block_reason: Option<&str>,
    ) -> Result<Account>;

    /// Apply a billing rewrite iff `seq` is newer than the last applied
    /// sequence. Returns false when the delivery is stale. A delivery
    /// without a sequence skips the ordering guard and always applies.
    async fn apply_entitlement(
        &self,
        id: Uuid,
        seq: Option<i64>,
        update: &EntitlementUpdate,
    ) -> Result<bool>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<bool>;
}

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn convert(row: Option<AccountRow>) -> Result<Option<Account>> {
    match row {
        Some(row) => Ok(Some(row.try_into()?)),
        None => Ok(None),
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert(&self, account: &Account) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            "INSERT INTO accounts (
                id, email, plan, status, credential_hash, credential_prefix,
                block_reason, quota_used, quota_limit, period_start, period_end,
                last_event_seq, last_payment_at, created_at, last_used_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING *",
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(account.plan.as_str())
        .bind(account.status.as_str())
        .bind(&account.credential_hash)
        .bind(&account.credential_prefix)
        .bind(&account.block_reason)
        .bind(account.quota_used)
        .bind(account.quota_limit)
        .bind(account.period_start)
        .bind(account.period_end)
        .bind(account.last_event_seq)
        .bind(account.last_payment_at)
        .bind(account.created_at)
        .bind(account.last_used_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert account")?;

        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load account by id")?;

        convert(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load account by email")?;

        convert(row)
    }

    async fn find_by_credential_hash(&self, digest: &str) -> Result<Option<Account>> {
        let row =
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE credential_hash = $1")
                .bind(digest)
                .fetch_optional(&self.pool)
                .await
                .context("failed to load account by credential")?;

        convert(row)
    }

    async fn list(
        &self,
        filter: &AccountFilter,
        page: i64,
        per_page: i64,
    ) -> Result<AccountPage> {
        let offset = (page.max(1) - 1) * per_page;

        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts
             WHERE ($1::text IS NULL OR plan = $1)
               AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(filter.plan.map(|p| p.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list accounts")?;

        let total = self.count(filter).await?;

        let accounts = rows
            .into_iter()
            .map(Account::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(AccountPage { accounts, total })
    }

    async fn count(&self, filter: &AccountFilter) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM accounts
             WHERE ($1::text IS NULL OR plan = $1)
               AND ($2::text IS NULL OR status = $2)",
        )
        .bind(filter.plan.map(|p| p.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await
        .context("failed to count accounts")
    }

    async fn consume_quota(&self, id: Uuid, now: DateTime<Utc>) -> Result<QuotaConsume> {
        let new_end = month_after(now);

        // Rollover and consume in one statement so two concurrent requests
        // can never both observe the pre-rollover counter.
        let row = sqlx::query_as::<_, AccountRow>(
            "UPDATE accounts SET
                quota_used = CASE WHEN period_end <= $2 THEN 1 ELSE quota_used + 1 END,
                period_start = CASE WHEN period_end <= $2 THEN $2 ELSE period_start END,
                period_end = CASE WHEN period_end <= $2 THEN $3 ELSE period_end END
             WHERE id = $1
               AND (CASE WHEN period_end <= $2 THEN 0 ELSE quota_used END) < quota_limit
             RETURNING *",
        )
        .bind(id)
        .bind(now)
        .bind(new_end)
        .fetch_optional(&self.pool)
        .await
        .context("failed to consume quota")?;

        match convert(row)? {
            Some(account) => Ok(QuotaConsume::Admitted {
                used: account.quota_used,
                limit: account.quota_limit,
                period_end: account.period_end,
            }),
            None => {
                // Either exhausted or the account vanished mid-flight; a
                // second read says which.
                let account = self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| anyhow!("account {id} not found"))?;

                Ok(QuotaConsume::Exhausted {
                    limit: account.quota_limit,
                    resets_at: account.period_end,
                })
            }
        }
    }

    async fn rotate_credential(&self, id: Uuid, digest: &str, prefix: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET credential_hash = $2, credential_prefix = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(digest)
        .bind(prefix)
        .execute(&self.pool)
        .await
        .context("failed to rotate credential")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("account {id} not found"));
        }

        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        block_reason: Option<&str>,
    ) -> Result<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            "UPDATE accounts SET status = $2, block_reason = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(block_reason)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update account status")?;

        convert(row)?.ok_or_else(|| anyhow!("account {id} not found"))
    }

    async fn apply_entitlement(
        &self,
        id: Uuid,
        seq: Option<i64>,
        update: &EntitlementUpdate,
    ) -> Result<bool> {
        let (period_start, period_end) = match update.period {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None, None),
        };

        let result = sqlx::query(
            "UPDATE accounts SET
                plan = COALESCE($3, plan),
                status = COALESCE($4, status),
                quota_limit = COALESCE($5, quota_limit),
                period_start = COALESCE($6, period_start),
                period_end = COALESCE($7, period_end),
                quota_used = CASE WHEN $8 THEN 0 ELSE quota_used END,
                last_payment_at = COALESCE($9, last_payment_at),
                last_event_seq = COALESCE($2, last_event_seq)
             WHERE id = $1 AND ($2::BIGINT IS NULL OR last_event_seq < $2)",
        )
        .bind(id)
        .bind(seq)
        .bind(update.plan.map(|p| p.as_str()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.quota_limit)
        .bind(period_start)
        .bind(period_end)
        .bind(update.reset_quota_used)
        .bind(update.last_payment_at)
        .execute(&self.pool)
        .await
        .context("failed to apply entitlement update")?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        // Best-effort; the account may have been deleted since lookup.
        sqlx::query("UPDATE accounts SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .context("failed to touch last_used_at")?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete account")?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory account store for tests and single-process development.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(account: &Account, filter: &AccountFilter) -> bool {
    filter.plan.map_or(true, |p| account.plan == p)
        && filter.status.map_or(true, |s| account.status == s)
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn insert(&self, account: &Account) -> Result<Account> {
        let mut accounts = self.accounts.write().await;

        if accounts.values().any(|a| a.email == account.email) {
            return Err(anyhow!("email already registered: {}", account.email));
        }

        accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_by_credential_hash(&self, digest: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|a| a.credential_hash == digest)
            .cloned())
    }

    async fn list(
        &self,
        filter: &AccountFilter,
        page: i64,
        per_page: i64,
    ) -> Result<AccountPage> {
        let accounts = self.accounts.read().await;

        let mut matched: Vec<Account> = accounts
            .values()
            .filter(|a| matches_filter(a, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as i64;
        let offset = ((page.max(1) - 1) * per_page) as usize;
        let accounts = matched
            .into_iter()
            .skip(offset)
            .take(per_page.max(0) as usize)
            .collect();

        Ok(AccountPage { accounts, total })
    }

    async fn count(&self, filter: &AccountFilter) -> Result<i64> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| matches_filter(a, filter))
            .count() as i64)
    }

    async fn consume_quota(&self, id: Uuid, now: DateTime<Utc>) -> Result<QuotaConsume> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("account {id} not found"))?;

        if account.period_end <= now {
            account.quota_used = 0;
            account.period_start = now;
            account.period_end = month_after(now);
        }

        if account.quota_used < account.quota_limit {
            account.quota_used += 1;
            Ok(QuotaConsume::Admitted {
                used: account.quota_used,
                limit: account.quota_limit,
                period_end: account.period_end,
            })
        } else {
            Ok(QuotaConsume::Exhausted {
                limit: account.quota_limit,
                resets_at: account.period_end,
            })
        }
    }

    async fn rotate_credential(&self, id: Uuid, digest: &str, prefix: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("account {id} not found"))?;

        account.credential_hash = digest.to_string();
        account.credential_prefix = prefix.to_string();
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        block_reason: Option<&str>,
    ) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("account {id} not found"))?;

        account.status = status;
        account.block_reason = block_reason.map(str::to_string);
        Ok(account.clone())
    }

    async fn apply_entitlement(
        &self,
        id: Uuid,
        seq: Option<i64>,
        update: &EntitlementUpdate,
    ) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        let account = match accounts.get_mut(&id) {
            Some(account) => account,
            None => return Ok(false),
        };

        if let Some(seq) = seq {
            if account.last_event_seq >= seq {
                return Ok(false);
            }
        }

        if let Some(plan) = update.plan {
            account.plan = plan;
        }
        if let Some(status) = update.status {
            account.status = status;
        }
        if let Some(limit) = update.quota_limit {
            account.quota_limit = limit;
        }
        if let Some((start, end)) = update.period {
            account.period_start = start;
            account.period_end = end;
        }
        if update.reset_quota_used {
            account.quota_used = 0;
        }
        if let Some(at) = update.last_payment_at {
            account.last_payment_at = Some(at);
        }
        if let Some(seq) = seq {
            account.last_event_seq = seq;
        }

        Ok(true)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.accounts.write().await.remove(&id).is_some())
    }
}
