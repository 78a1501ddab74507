//! The gateway's dependency container.
//!
//! Every store and external boundary hangs off [`GatewayDeps`] behind a
//! trait, so the request path, the reconciler, the maintenance job, and the
//! test suites all wire against the same seams. Production wires Postgres
//! stores and the real origin client; tests wire the in-memory twins.

use std::sync::Arc;

use sqlx::PgPool;

use crate::domains::accounts::store::{AccountStore, PgAccountStore};
use crate::domains::admin::session::AdminSessionStore;
use crate::domains::admission::rate_limiter::RateLimiter;
use crate::domains::billing::store::{BillingEventStore, PgBillingEventStore};
use crate::domains::usage::store::{PgUsageStore, UsageStore};
use crate::kernel::cache::{CacheStore, MemoryCacheStore};
use crate::kernel::notifier::{Notifier, TracingNotifier};
use crate::kernel::origin::OriginFetcher;
use crate::Config;

#[derive(Clone)]
pub struct GatewayDeps {
    pub accounts: Arc<dyn AccountStore>,
    pub usage: Arc<dyn UsageStore>,
    pub billing_events: Arc<dyn BillingEventStore>,
    pub cache: Arc<dyn CacheStore>,
    pub origin: Arc<dyn OriginFetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: RateLimiter,
    pub sessions: Arc<AdminSessionStore>,
}

impl GatewayDeps {
    /// Production wiring: Postgres-backed stores, in-process cache and
    /// rate/session state, log-backed notifications.
    pub fn postgres(pool: PgPool, config: &Config, origin: Arc<dyn OriginFetcher>) -> Self {
        Self {
            accounts: Arc::new(PgAccountStore::new(pool.clone())),
            usage: Arc::new(PgUsageStore::new(pool.clone())),
            billing_events: Arc::new(PgBillingEventStore::new(pool)),
            cache: Arc::new(MemoryCacheStore::new(config.cache_capacity)),
            origin,
            notifier: Arc::new(TracingNotifier),
            rate_limiter: RateLimiter::new(),
            sessions: Arc::new(AdminSessionStore::new(std::time::Duration::from_secs(
                config.admin_session_timeout_mins.max(1) as u64 * 60,
            ))),
        }
    }
}
