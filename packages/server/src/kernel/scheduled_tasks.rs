//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! One hourly maintenance job keeps the in-process and persisted state
//! bounded: idle rate windows, expired admin sessions, expired cache
//! entries, and usage/billing rows past their retention windows. All
//! enforcement-relevant expiry is lazy at access time; this job only
//! reclaims memory and disk.

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::kernel::deps::GatewayDeps;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub usage_days: i64,
    pub billing_days: i64,
}

/// Start the maintenance scheduler. Runs hourly.
pub async fn start_scheduler(deps: GatewayDeps, retention: RetentionPolicy) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let deps = deps.clone();
        Box::pin(async move {
            if let Err(e) = run_maintenance(&deps, retention).await {
                tracing::error!(error = %e, "maintenance task failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!("maintenance scheduler started (hourly)");
    Ok(scheduler)
}

/// One maintenance pass. Public so tests can drive it without the cron.
pub async fn run_maintenance(deps: &GatewayDeps, retention: RetentionPolicy) -> Result<()> {
    let swept_sessions = deps.sessions.sweep_expired().await;
    let compacted_windows = deps.rate_limiter.compact().await;
    let purged_cache = deps.cache.purge_expired().await?;

    let now = Utc::now();
    let pruned_usage = deps
        .usage
        .prune_before(now - chrono::Duration::days(retention.usage_days))
        .await?;
    let pruned_events = deps
        .billing_events
        .prune_before(now - chrono::Duration::days(retention.billing_days))
        .await?;

    tracing::info!(
        swept_sessions,
        compacted_windows,
        purged_cache,
        pruned_usage,
        pruned_events,
        "maintenance pass complete"
    );
    Ok(())
}
