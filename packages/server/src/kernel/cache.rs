//! Response cache with single-flight coalescing.
//!
//! The cache itself is a trait-backed store of extraction payloads keyed by
//! request fingerprint, with a TTL horizon and capacity-bounded LRU
//! eviction. An expired entry is a miss, never a stale hit. The
//! [`SingleFlight`] front sits between the cache and the origin so that
//! concurrent misses on one fingerprint share a single upstream fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use origin_client::models::ExtractionPayload;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex, RwLock};
use url::Url;

/// Canonical form of a target URL: scheme and host lowercased, default port
/// and fragment dropped. Two spellings of the same target must fingerprint
/// identically or the cache fragments.
pub fn canonical_target(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;
    url.set_fragment(None);
    Some(url.to_string())
}

/// Deterministic cache key over the canonical target and the
/// admission-relevant request options.
pub fn fingerprint(canonical_url: &str, include_metadata: bool, detect_region: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update([include_metadata as u8, detect_region as u8]);
    format!("{:x}", hasher.finalize())
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the payload stored under `fingerprint` if its horizon has not
    /// passed. An expired entry is a miss.
    async fn lookup(&self, fingerprint: &str) -> Result<Option<ExtractionPayload>>;

    async fn store(
        &self,
        fingerprint: &str,
        payload: &ExtractionPayload,
        ttl: Duration,
    ) -> Result<()>;

    /// Drop entries past their horizon. Returns how many went away.
    async fn purge_expired(&self) -> Result<usize>;
}

struct CacheEntry {
    payload: ExtractionPayload,
    expires_at: Instant,
    last_read: Instant,
}

/// In-process TTL + LRU cache store.
///
/// At capacity the least-recently-read entry is evicted to make room; an
/// early eviction is just a future miss, so the never-serve-stale contract
/// only depends on the expiry check in `lookup`.
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    capacity: usize,
}

impl MemoryCacheStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn lookup(&self, fingerprint: &str) -> Result<Option<ExtractionPayload>> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        match entries.get_mut(fingerprint) {
            Some(entry) if entry.expires_at > now => {
                entry.last_read = now;
                Ok(Some(entry.payload.clone()))
            }
            Some(_) => {
                entries.remove(fingerprint);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        fingerprint: &str,
        payload: &ExtractionPayload,
        ttl: Duration,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if !entries.contains_key(fingerprint) && entries.len() >= self.capacity {
            // Evict expired entries first, then the least-recently-read one.
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.capacity {
                if let Some(victim) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_read)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                payload: payload.clone(),
                expires_at: now + ttl,
                last_read: now,
            },
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}

/// Coalesces concurrent work keyed by string so that at most one instance
/// runs at a time per key.
///
/// The first caller for a key becomes the leader; its work runs in a
/// spawned task so a disconnected leader cannot strand the others. Every
/// caller, leader included, receives a clone of the one result.
pub struct SingleFlight<T: Clone + Send + 'static> {
    flights: Arc<Mutex<HashMap<String, broadcast::Sender<T>>>>,
}

impl<T: Clone + Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or wait for the in-flight run of it.
    pub async fn run<F>(&self, key: &str, work: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        enum Role<T> {
            Leader(tokio::task::JoinHandle<T>),
            Waiter(broadcast::Receiver<T>),
        }

        // Waiters never consume `work`, so a waiter promoted to leader on a
        // later pass still has it.
        let mut work = Some(work);
        loop {
            let role = {
                let mut flights = self.flights.lock().await;
                if let Some(tx) = flights.get(key) {
                    Role::Waiter(tx.subscribe())
                } else {
                    let (tx, _rx) = broadcast::channel(1);
                    flights.insert(key.to_string(), tx.clone());

                    let flights = Arc::clone(&self.flights);
                    let key = key.to_string();
                    let work = work.take().expect("leader runs at most once");
                    Role::Leader(tokio::spawn(async move {
                        let result = work.await;
                        // Deregister before publishing so a caller arriving
                        // after the send starts a fresh flight instead of
                        // waiting on a closed channel.
                        flights.lock().await.remove(&key);
                        let _ = tx.send(result.clone());
                        result
                    }))
                }
            };

            match role {
                // The leader's work runs in its own task so a disconnected
                // leader cannot strand the waiters; the leader itself reads
                // the result off the task, not the channel.
                Role::Leader(handle) => match handle.await {
                    Ok(result) => return result,
                    Err(err) => {
                        self.flights.lock().await.remove(key);
                        std::panic::resume_unwind(err.into_panic());
                    }
                },
                Role::Waiter(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    Err(_) => {
                        // Leader died without publishing. Clear the stale
                        // flight and lead the next pass ourselves.
                        self.flights.lock().await.remove(key);
                    }
                },
            }
        }
    }

    /// Number of in-flight keys, for tests and diagnostics.
    pub async fn in_flight(&self) -> usize {
        self.flights.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(id: &str) -> ExtractionPayload {
        ExtractionPayload {
            media_id: id.to_string(),
            title: Some("clip".to_string()),
            author: None,
            duration_secs: Some(12),
            download_url: format!("https://cdn.example/{id}"),
            thumbnail_url: None,
            region: None,
            metadata: None,
        }
    }

    #[test]
    fn canonical_target_collapses_equivalent_spellings() {
        let a = canonical_target("HTTPS://Media.Example:443/clip/1#t=3").unwrap();
        let b = canonical_target("https://media.example/clip/1").unwrap();
        assert_eq!(a, b);

        assert!(canonical_target("ftp://media.example/clip").is_none());
        assert!(canonical_target("not a url").is_none());
    }

    #[test]
    fn fingerprint_varies_with_target_and_options() {
        let url = "https://media.example/clip/1";
        assert_eq!(fingerprint(url, true, false), fingerprint(url, true, false));
        assert_ne!(fingerprint(url, true, false), fingerprint(url, false, false));
        assert_ne!(
            fingerprint(url, true, false),
            fingerprint("https://media.example/clip/2", true, false)
        );
    }

    #[tokio::test]
    async fn round_trip_before_the_horizon_returns_the_payload() {
        let cache = MemoryCacheStore::new(10);
        let stored = payload("m1");

        cache
            .store("fp", &stored, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.lookup("fp").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let cache = MemoryCacheStore::new(10);
        cache
            .store("fp", &payload("m1"), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.lookup("fp").await.unwrap(), None);
        // The expired entry is also dropped on read.
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn capacity_evicts_the_least_recently_read_entry() {
        let cache = MemoryCacheStore::new(2);
        let ttl = Duration::from_secs(60);
        cache.store("a", &payload("a"), ttl).await.unwrap();
        cache.store("b", &payload("b"), ttl).await.unwrap();

        // Touch "a" so "b" becomes the LRU victim.
        cache.lookup("a").await.unwrap();
        cache.store("c", &payload("c"), ttl).await.unwrap();

        assert!(cache.lookup("a").await.unwrap().is_some());
        assert!(cache.lookup("b").await.unwrap().is_none());
        assert!(cache.lookup("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let cache = MemoryCacheStore::new(10);
        cache
            .store("old", &payload("old"), Duration::from_millis(5))
            .await
            .unwrap();
        cache
            .store("live", &payload("live"), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_runs_share_one_execution() {
        let flights = Arc::new(SingleFlight::<u64>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let attempts = (0..25).map(|_| {
            let flights = Arc::clone(&flights);
            let executions = Arc::clone(&executions);
            async move {
                flights
                    .run("key", async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        42u64
                    })
                    .await
            }
        });

        let results = join_all(attempts).await;
        assert!(results.iter().all(|r| *r == 42));
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight().await, 0);
    }

    #[tokio::test]
    async fn a_dead_leader_does_not_strand_the_key() {
        let flights = Arc::new(SingleFlight::<u8>::new());

        let f = Arc::clone(&flights);
        let leader = tokio::spawn(async move { f.run("key", async { panic!("boom") }).await });
        assert!(leader.await.is_err());

        assert_eq!(flights.run("key", async { 7 }).await, 7);
        assert_eq!(flights.in_flight().await, 0);
    }

    #[tokio::test]
    async fn flights_on_different_keys_run_independently() {
        let flights = SingleFlight::<&'static str>::new();
        let a = flights.run("a", async { "a" }).await;
        let b = flights.run("b", async { "b" }).await;
        assert_eq!((a, b), ("a", "b"));
    }
}
