//! In-process sliding-window store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

use super::{RateStore, StoreRequest, StoreVerdict};
use crate::dependency::DependencyFailure;

/// Request log for one key.
#[derive(Debug, Default)]
struct SlidingLog {
    /// Window length of the most recent request
    window_ms: i64,
    /// Request timestamps in ascending order
    timestamps: VecDeque<i64>,
}

impl SlidingLog {
    fn trim(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        while self.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    fn is_stale(&self, now_ms: i64) -> bool {
        self.timestamps
            .back()
            .map_or(true, |&newest| newest <= now_ms - self.window_ms)
    }
}

/// Sliding-window log kept in process memory.
///
/// Mirrors the Redis script so a single node can run without Redis and
/// tests can exercise the gate without a server. Keys do not expire on
/// their own; call [`RateStore::purge_expired`] periodically.
#[derive(Default)]
pub struct MemoryStore {
    logs: DashMap<String, SlidingLog>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn logged(&self, key: &str) -> usize {
        self.logs.get(key).map(|log| log.timestamps.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn record(&self, request: &StoreRequest) -> Result<StoreVerdict, DependencyFailure> {
        let mut log = self.logs.entry(request.key.clone()).or_default();
        log.window_ms = request.window_ms;
        log.trim(request.now_ms);

        let allowed = (log.timestamps.len() as u64) < request.limit;
        if allowed {
            log.timestamps.push_back(request.now_ms);
        }

        let count = log.timestamps.len() as u64;
        let reset_ms = log
            .timestamps
            .front()
            .map(|&oldest| oldest + request.window_ms)
            .unwrap_or(request.now_ms + request.window_ms);

        Ok(StoreVerdict {
            allowed,
            limit: request.limit,
            remaining: request.limit.saturating_sub(count),
            reset_ms,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| !log.is_stale(now_ms));
        let removed = before.saturating_sub(self.logs.len());
        if removed > 0 {
            debug!(removed, "Purged expired sliding windows");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(now_ms: i64) -> StoreRequest {
        StoreRequest {
            key: "ratelimit:127.0.0.1".to_string(),
            now_ms,
            window_ms: 1_000,
            limit: 5,
            member: format!("m-{}", now_ms),
        }
    }

    #[tokio::test]
    async fn test_sliding_window_counts_down() {
        let store = MemoryStore::new();

        for i in 0..5u64 {
            let verdict = store.record(&request(10_000)).await.unwrap();
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, 5 - 1 - i);
            assert_eq!(verdict.reset_ms, 11_000);
        }

        let verdict = store.record(&request(10_000)).await.unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.remaining, 0);
        assert_eq!(store.logged("ratelimit:127.0.0.1"), 5);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let store = MemoryStore::new();

        for offset in [0, 200, 400, 600, 800] {
            assert!(store.record(&request(10_000 + offset)).await.unwrap().allowed);
        }
        assert!(!store.record(&request(10_900)).await.unwrap().allowed);

        // The request at 10_000 leaves the window at 11_000
        let verdict = store.record(&request(11_000)).await.unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.remaining, 0);
        assert_eq!(verdict.reset_ms, 11_200);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        let mut other = request(10_000);
        other.key = "ratelimit:10.0.0.1".to_string();
        other.limit = 1;

        assert!(store.record(&other).await.unwrap().allowed);
        assert!(!store.record(&other).await.unwrap().allowed);
        assert!(store.record(&request(10_000)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_purge_drops_idle_keys() {
        let store = MemoryStore::new();

        for i in 0..10_000 {
            let mut req = request(0);
            req.key = format!("ratelimit:client-{}", i);
            store.record(&req).await.unwrap();
        }
        store.record(&request(3_600_000)).await.unwrap();
        assert_eq!(store.logs.len(), 10_001);

        assert_eq!(store.purge_expired(3_600_000), 10_000);
        assert_eq!(store.logs.len(), 1);
        assert_eq!(store.logged("ratelimit:127.0.0.1"), 1);

        // The surviving key expires once its last request leaves the window
        assert_eq!(store.purge_expired(3_600_999), 0);
        assert_eq!(store.purge_expired(3_601_000), 1);
        assert!(store.logs.is_empty());
    }
}
