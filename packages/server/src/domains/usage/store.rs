//! Usage-record persistence.
//!
//! Recording must never block or fail an admission response; callers treat
//! errors here as log-and-continue. Stats are computed in the store so the
//! Postgres implementation can aggregate without shipping rows around.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::models::usage_record::{SystemStats, UsageRecord, UsageStats, OUTCOME_ADMITTED};

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> Result<()>;

    /// Aggregates for one account since `since`.
    async fn account_stats(&self, email: &str, since: DateTime<Utc>) -> Result<UsageStats>;

    /// System-wide aggregates since `since`.
    async fn system_stats(&self, since: DateTime<Utc>) -> Result<SystemStats>;

    /// Delete records older than `cutoff`. Returns how many went away.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total: i64,
    successful: i64,
    failed: i64,
    cached: i64,
    avg_duration: f64,
}

impl From<StatsRow> for UsageStats {
    fn from(row: StatsRow) -> Self {
        UsageStats {
            total_requests: row.total,
            successful_requests: row.successful,
            failed_requests: row.failed,
            cached_requests: row.cached,
            avg_duration_ms: row.avg_duration,
        }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn record(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_records (
                id, account_id, email, credential_prefix, endpoint, target_url,
                outcome, gate, status_code, cached, duration_ms, client_ip,
                user_agent, error, recorded_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(record.id)
        .bind(record.account_id)
        .bind(&record.email)
        .bind(&record.credential_prefix)
        .bind(&record.endpoint)
        .bind(&record.target_url)
        .bind(&record.outcome)
        .bind(&record.gate)
        .bind(record.status_code)
        .bind(record.cached)
        .bind(record.duration_ms)
        .bind(&record.client_ip)
        .bind(&record.user_agent)
        .bind(&record.error)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .context("failed to insert usage record")?;

        Ok(())
    }

    async fn account_stats(&self, email: &str, since: DateTime<Utc>) -> Result<UsageStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE outcome = 'admitted') AS successful,
                COUNT(*) FILTER (WHERE outcome <> 'admitted') AS failed,
                COUNT(*) FILTER (WHERE cached) AS cached,
                COALESCE(AVG(duration_ms)::double precision, 0) AS avg_duration
             FROM usage_records
             WHERE email = $1 AND recorded_at >= $2",
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate account usage")?;

        Ok(row.into())
    }

    async fn system_stats(&self, since: DateTime<Utc>) -> Result<SystemStats> {
        #[derive(sqlx::FromRow)]
        struct SystemRow {
            total: i64,
            successful: i64,
            failed: i64,
            cached: i64,
            avg_duration: f64,
            active_accounts: i64,
        }

        let row = sqlx::query_as::<_, SystemRow>(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE outcome = 'admitted') AS successful,
                COUNT(*) FILTER (WHERE outcome <> 'admitted') AS failed,
                COUNT(*) FILTER (WHERE cached) AS cached,
                COALESCE(AVG(duration_ms)::double precision, 0) AS avg_duration,
                COUNT(DISTINCT email) FILTER (WHERE email IS NOT NULL) AS active_accounts
             FROM usage_records
             WHERE recorded_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("failed to aggregate system usage")?;

        Ok(SystemStats {
            stats: UsageStats {
                total_requests: row.total,
                successful_requests: row.successful,
                failed_requests: row.failed,
                cached_requests: row.cached,
                avg_duration_ms: row.avg_duration,
            },
            active_accounts: row.active_accounts,
        })
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM usage_records WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("failed to prune usage records")?;

        Ok(result.rows_affected())
    }
}

/// In-memory usage trail for tests and single-process development.
#[derive(Default)]
pub struct MemoryUsageStore {
    records: Arc<RwLock<Vec<UsageRecord>>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }
}

fn aggregate<'a>(records: impl Iterator<Item = &'a UsageRecord>) -> UsageStats {
    let mut stats = UsageStats::default();
    let mut duration_total = 0i64;

    for record in records {
        stats.total_requests += 1;
        if record.outcome == OUTCOME_ADMITTED {
            stats.successful_requests += 1;
        } else {
            stats.failed_requests += 1;
        }
        if record.cached {
            stats.cached_requests += 1;
        }
        duration_total += record.duration_ms;
    }

    if stats.total_requests > 0 {
        stats.avg_duration_ms = duration_total as f64 / stats.total_requests as f64;
    }

    stats
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn record(&self, record: &UsageRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn account_stats(&self, email: &str, since: DateTime<Utc>) -> Result<UsageStats> {
        let records = self.records.read().await;
        Ok(aggregate(records.iter().filter(|r| {
            r.recorded_at >= since && r.email.as_deref() == Some(email)
        })))
    }

    async fn system_stats(&self, since: DateTime<Utc>) -> Result<SystemStats> {
        let records = self.records.read().await;
        let in_window: Vec<&UsageRecord> =
            records.iter().filter(|r| r.recorded_at >= since).collect();

        let active: HashSet<&str> = in_window
            .iter()
            .filter_map(|r| r.email.as_deref())
            .collect();

        Ok(SystemStats {
            stats: aggregate(in_window.iter().copied()),
            active_accounts: active.len() as i64,
        })
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.recorded_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
