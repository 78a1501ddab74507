//! Outbound notification boundary.
//!
//! The entitlement reconciler announces account-affecting transitions here;
//! actual delivery (email, chat bots) lives outside this service. The
//! shipped implementation writes to the log.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce that `event` changed the named account.
    async fn account_event(&self, email: &str, event: &str, detail: &str) -> Result<()>;
}

pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn account_event(&self, email: &str, event: &str, detail: &str) -> Result<()> {
        tracing::info!(account = %email, event, detail, "account notification");
        Ok(())
    }
}
