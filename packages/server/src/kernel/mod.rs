//! Kernel module - server infrastructure and dependencies.

pub mod cache;
pub mod deps;
pub mod notifier;
pub mod origin;
pub mod scheduled_tasks;

pub use cache::{canonical_target, fingerprint, CacheStore, MemoryCacheStore, SingleFlight};
pub use deps::GatewayDeps;
pub use notifier::{Notifier, TracingNotifier};
pub use origin::{OriginFetcher, OriginServiceFetcher};
pub use scheduled_tasks::{run_maintenance, start_scheduler, RetentionPolicy};
