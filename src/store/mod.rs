//! Sliding-window rate stores.
//!
//! A store keeps a log of request timestamps per key and decides, atomically,
//! whether one more request fits in the trailing window.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;

use crate::dependency::DependencyFailure;

/// One request to record against a sliding window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    /// Store key for the scope
    pub key: String,
    /// Request time in unix milliseconds
    pub now_ms: i64,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// Requests allowed per window
    pub limit: u64,
    /// Unique member id for this request
    pub member: String,
}

impl StoreRequest {
    /// Build a request stamped with the current time and a fresh member id.
    pub fn now(key: String, window_ms: i64, limit: u64) -> Self {
        Self {
            key,
            now_ms: chrono::Utc::now().timestamp_millis(),
            window_ms,
            limit,
            member: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The store's decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreVerdict {
    /// Whether the request was recorded
    pub allowed: bool,
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the window after this one
    pub remaining: u64,
    /// When the oldest request leaves the window, in unix milliseconds
    pub reset_ms: i64,
}

/// Trait for sliding-window store implementations.
///
/// Implementations classify their own errors so callers can choose a
/// failure policy without inspecting driver-specific types.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Record `request` if it fits in its window.
    async fn record(&self, request: &StoreRequest) -> Result<StoreVerdict, DependencyFailure>;

    /// Human-readable store name for logs.
    fn name(&self) -> &'static str;

    /// Drop keys whose whole log has left its window at `now_ms`.
    ///
    /// Returns the number of keys removed. Stores that expire keys on their
    /// own (Redis `PEXPIRE`) keep the default.
    fn purge_expired(&self, _now_ms: i64) -> usize {
        0
    }
}
