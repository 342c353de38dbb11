//! Outbound call spacing
//!
//! Enforces a minimum gap between platform calls, both across all calls
//! (the `global` key) and per page. A caller reserves its slot inside the
//! lock and sleeps outside it, so concurrent callers queue up behind each
//! other instead of firing together.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Key under which call spacing is tracked
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThrottleKey {
    Global,
    Target(String),
}

impl ThrottleKey {
    pub fn target(id: impl Into<String>) -> Self {
        ThrottleKey::Target(id.into())
    }
}

impl std::fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThrottleKey::Global => write!(f, "global"),
            ThrottleKey::Target(id) => write!(f, "target:{}", id),
        }
    }
}

pub struct ThrottleScheduler {
    global_interval: Duration,
    target_interval: Duration,
    last_call: Mutex<HashMap<ThrottleKey, Instant>>,
}

impl ThrottleScheduler {
    pub fn new(global_interval: Duration, target_interval: Duration) -> Self {
        Self {
            global_interval,
            target_interval,
            last_call: Mutex::new(HashMap::new()),
        }
    }

    fn interval(&self, key: &ThrottleKey) -> Duration {
        match key {
            ThrottleKey::Global => self.global_interval,
            ThrottleKey::Target(_) => self.target_interval,
        }
    }

    /// Claim the next permitted call slot for `key` and the global key
    ///
    /// Returns the instant at which the caller may issue its call. The slot
    /// is recorded before returning, so the next caller is spaced from it.
    pub fn reserve(&self, key: &ThrottleKey) -> Instant {
        let mut last_call = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        let earliest = |k: &ThrottleKey| {
            last_call
                .get(k)
                .map(|last| last.checked_add(self.interval(k)).unwrap_or(*last))
                .unwrap_or(now)
        };

        let mut slot = now.max(earliest(&ThrottleKey::Global));
        if *key != ThrottleKey::Global {
            slot = slot.max(earliest(key));
        }

        last_call.insert(ThrottleKey::Global, slot);
        if *key != ThrottleKey::Global {
            last_call.insert(key.clone(), slot);
        }
        slot
    }

    /// Wait until a call under `key` is permitted, then return
    pub async fn await_turn(&self, key: &ThrottleKey) {
        let slot = self.reserve(key);
        let now = Instant::now();
        if slot > now {
            tracing::debug!(
                key = %key,
                wait_ms = (slot - now).as_millis() as u64,
                "Throttling outbound call"
            );
            sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn scheduler() -> ThrottleScheduler {
        ThrottleScheduler::new(Duration::from_secs(1), Duration::from_secs(2))
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ThrottleKey::Global.to_string(), "global");
        assert_eq!(ThrottleKey::target("42").to_string(), "target:42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate() {
        let scheduler = scheduler();
        let start = Instant::now();
        scheduler.await_turn(&ThrottleKey::target("42")).await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_target_spaced_by_target_interval() {
        let scheduler = scheduler();
        let key = ThrottleKey::target("42");

        let mut stamps = Vec::new();
        for _ in 0..4 {
            scheduler.await_turn(&key).await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_targets_spaced_by_global_interval() {
        let scheduler = scheduler();
        let start = Instant::now();

        scheduler.await_turn(&ThrottleKey::target("1")).await;
        scheduler.await_turn(&ThrottleKey::target("2")).await;
        let second = Instant::now();
        assert_eq!(second - start, Duration::from_secs(1));

        // Back to the first page: its own 2s interval dominates
        scheduler.await_turn(&ThrottleKey::target("1")).await;
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_key_respects_global_interval() {
        let scheduler = scheduler();
        let start = Instant::now();
        scheduler.await_turn(&ThrottleKey::Global).await;
        scheduler.await_turn(&ThrottleKey::Global).await;
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_means_no_wait() {
        let scheduler = scheduler();
        let key = ThrottleKey::target("42");
        scheduler.await_turn(&key).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        let before = Instant::now();
        scheduler.await_turn(&key).await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_share_a_slot() {
        let scheduler = Arc::new(scheduler());
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let scheduler = scheduler.clone();
                let stamps = stamps.clone();
                tokio::spawn(async move {
                    let key = ThrottleKey::target(format!("{}", i % 3));
                    scheduler.await_turn(&key).await;
                    stamps.lock().unwrap().push((key, Instant::now()));
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut stamps = stamps.lock().unwrap().clone();
        stamps.sort_by_key(|(_, at)| *at);

        for pair in stamps.windows(2) {
            assert!(
                pair[1].1 - pair[0].1 >= Duration::from_secs(1),
                "Global spacing violated"
            );
        }
        for (i, (key, at)) in stamps.iter().enumerate() {
            if let Some((_, prev)) = stamps[..i].iter().rev().find(|(k, _)| k == key) {
                assert!(*at - *prev >= Duration::from_secs(2), "Target spacing violated");
            }
        }
    }
}
