//! Redis-backed sliding-window store.

use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisError, Script};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

use super::{RateStore, StoreRequest, StoreVerdict};
use crate::dependency::DependencyFailure;
use crate::error::Result;

const SLIDING_WINDOW_SCRIPT: &str = include_str!("sliding_window.lua");

/// Sliding-window store executing an atomic Lua script in Redis.
///
/// The connection is established lazily and cached. It is dropped after a
/// connection-level error so the next call reconnects.
pub struct RedisStore {
    client: Client,
    script: Script,
    connect_timeout: Duration,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Create a store for the given connection URL.
    ///
    /// No connection is made until the first call.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            connect_timeout,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> std::result::Result<MultiplexedConnection, DependencyFailure> {
        let cached = self.connection.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        debug!("Opening Redis connection");
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| DependencyFailure::Timeout(self.connect_timeout))?
        .map_err(|e| self.classify(e))?;

        *self.connection.lock() = Some(conn.clone());
        Ok(conn)
    }

    fn classify(&self, error: RedisError) -> DependencyFailure {
        if error.is_timeout() {
            DependencyFailure::Timeout(self.connect_timeout)
        } else if error.is_connection_refusal()
            || error.is_connection_dropped()
            || error.is_io_error()
        {
            self.connection.lock().take();
            DependencyFailure::Connection(error.to_string())
        } else {
            DependencyFailure::Other(error.to_string())
        }
    }
}

#[async_trait]
impl RateStore for RedisStore {
    async fn record(&self, request: &StoreRequest) -> std::result::Result<StoreVerdict, DependencyFailure> {
        let mut conn = self.connection().await?;

        trace!(key = %request.key, now_ms = request.now_ms, "Running sliding window script");

        let reply: Vec<i64> = self
            .script
            .key(&request.key)
            .arg(request.now_ms)
            .arg(request.window_ms)
            .arg(request.limit)
            .arg(&request.member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;

        match reply.as_slice() {
            [allowed, limit, remaining, reset] => Ok(StoreVerdict {
                allowed: *allowed == 1,
                limit: (*limit).max(0) as u64,
                remaining: (*remaining).max(0) as u64,
                reset_ms: *reset,
            }),
            other => Err(DependencyFailure::Other(format!(
                "unexpected script reply: {:?}",
                other
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, limit: u64) -> StoreRequest {
        StoreRequest::now(key.to_string(), 1_000, limit)
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisStore::new("not a url", Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_classified() {
        let store = RedisStore::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();

        let failure = store.record(&request("ratelimit:test", 5)).await.unwrap_err();
        assert!(
            matches!(
                failure,
                DependencyFailure::Connection(_) | DependencyFailure::Timeout(_)
            ),
            "unexpected failure: {:?}",
            failure
        );
    }

    /// Requires a live Redis at `REDIS_URL` (default `redis://127.0.0.1:6379`).
    #[tokio::test]
    #[ignore]
    async fn test_sliding_window_against_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisStore::new(&url, Duration::from_secs(1)).unwrap();
        let key = format!("ratelimit:test-{}", uuid::Uuid::new_v4());

        for i in 0..5u64 {
            let verdict = store.record(&request(&key, 5)).await.unwrap();
            assert!(verdict.allowed);
            assert_eq!(verdict.remaining, 5 - 1 - i);
        }

        let verdict = store.record(&request(&key, 5)).await.unwrap();
        assert!(!verdict.allowed);
    }
}
