//! Per-account sliding-window rate limiter.
//!
//! Pure in-process state: a 60-second window of request markers per account.
//! Count-and-insert happens under the account's own lock, so two concurrent
//! requests can never both claim the last slot. Nothing here does I/O, which
//! is what keeps this gate fail-open by construction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<Uuid, Arc<Mutex<VecDeque<Instant>>>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically count the live markers and, if under the ceiling, record
    /// this request. Expired markers are pruned lazily on the way in.
    pub async fn check_and_record(&self, account_id: Uuid, per_minute: u32) -> RateDecision {
        let window = self.window_for(account_id).await;
        let mut markers = window.lock().await;
        decide(&mut markers, Instant::now(), per_minute)
    }

    async fn window_for(&self, account_id: Uuid) -> Arc<Mutex<VecDeque<Instant>>> {
        {
            let windows = self.windows.read().await;
            if let Some(window) = windows.get(&account_id) {
                return Arc::clone(window);
            }
        }

        let mut windows = self.windows.write().await;
        Arc::clone(windows.entry(account_id).or_default())
    }

    /// Drop windows whose markers have all expired (housekeeping). Returns
    /// how many windows were removed.
    pub async fn compact(&self) -> usize {
        let mut windows = self.windows.write().await;
        let now = Instant::now();
        let before = windows.len();
        windows.retain(|_, window| match window.try_lock() {
            Ok(mut markers) => {
                prune(&mut markers, now);
                !markers.is_empty()
            }
            // Someone is mid-check; keep the window.
            Err(_) => true,
        });
        before - windows.len()
    }
}

fn prune(markers: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = markers.front() {
        if now.duration_since(*oldest) >= WINDOW {
            markers.pop_front();
        } else {
            break;
        }
    }
}

fn decide(markers: &mut VecDeque<Instant>, now: Instant, per_minute: u32) -> RateDecision {
    prune(markers, now);

    if (markers.len() as u32) < per_minute {
        markers.push_back(now);
        RateDecision::Allowed {
            remaining: per_minute - markers.len() as u32,
        }
    } else {
        // Time until the oldest marker leaves the window, rounded up.
        let retry_after = markers
            .front()
            .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default();
        RateDecision::Limited {
            retry_after_secs: (retry_after.as_secs_f64().ceil() as u64).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn allows_up_to_the_ceiling_then_denies() {
        let limiter = RateLimiter::new();
        let account = Uuid::new_v4();

        for used in 1..=3u32 {
            let decision = limiter.check_and_record(account, 3).await;
            assert_eq!(decision, RateDecision::Allowed { remaining: 3 - used });
        }

        match limiter.check_and_record(account, 3).await {
            RateDecision::Limited { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accounts_do_not_share_windows() {
        let limiter = RateLimiter::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(matches!(
            limiter.check_and_record(first, 1).await,
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_record(first, 1).await,
            RateDecision::Limited { .. }
        ));
        assert!(matches!(
            limiter.check_and_record(second, 1).await,
            RateDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_burst_never_overshoots_the_ceiling() {
        let limiter = RateLimiter::new();
        let account = Uuid::new_v4();
        let ceiling = 10u32;

        let attempts = (0..ceiling * 2).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.check_and_record(account, ceiling).await }
        });

        let allowed = join_all(attempts)
            .await
            .into_iter()
            .filter(|d| matches!(d, RateDecision::Allowed { .. }))
            .count();

        assert_eq!(allowed as u32, ceiling);
    }

    #[test]
    fn expired_markers_free_their_slots() {
        let now = Instant::now();
        let mut markers: VecDeque<Instant> = VecDeque::new();
        markers.push_back(now - Duration::from_secs(61));
        markers.push_back(now - Duration::from_secs(30));

        // One slot freed by the expired marker, one still occupied.
        assert_eq!(
            decide(&mut markers, now, 2),
            RateDecision::Allowed { remaining: 0 }
        );
        assert_eq!(
            decide(&mut markers, now, 2),
            RateDecision::Limited {
                retry_after_secs: 30
            }
        );
    }

    #[test]
    fn retry_hint_tracks_the_oldest_marker() {
        let now = Instant::now();
        let mut markers: VecDeque<Instant> = VecDeque::new();
        markers.push_back(now - Duration::from_secs(45));

        match decide(&mut markers, now, 1) {
            RateDecision::Limited { retry_after_secs } => assert_eq!(retry_after_secs, 15),
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn compact_drops_fully_expired_windows() {
        let limiter = RateLimiter::new();
        let active = Uuid::new_v4();
        let idle = Uuid::new_v4();

        limiter.check_and_record(active, 10).await;
        {
            let mut windows = limiter.windows.write().await;
            let mut expired = VecDeque::new();
            expired.push_back(Instant::now() - Duration::from_secs(120));
            windows.insert(idle, Arc::new(Mutex::new(expired)));
        }

        assert_eq!(limiter.compact().await, 1);
        let windows = limiter.windows.read().await;
        assert!(windows.contains_key(&active));
        assert!(!windows.contains_key(&idle));
    }
}
