//! Shared state for HTTP handlers.

use std::sync::Arc;
use tracing::info;

use crate::config::{GatewayConfig, StoreBackend};
use crate::dependency::{BreakerSettings, DependencyClient};
use crate::error::Result;
use crate::gate::RequestGate;
use crate::ratelimit::{RateLimiter, ScopeMode};
use crate::store::{MemoryStore, RateStore, RedisStore};

/// State shared by every request.
pub struct GatewayState {
    /// The admission gate
    pub gate: Arc<RequestGate>,
    /// How client addresses map to scopes
    pub scope_mode: ScopeMode,
}

impl GatewayState {
    /// Create state around an existing gate.
    pub fn new(gate: Arc<RequestGate>, scope_mode: ScopeMode) -> Self {
        Self { gate, scope_mode }
    }

    /// Wire up the store, dependency client, limiter and gate from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let store: Arc<dyn RateStore> = match config.redis.backend {
            StoreBackend::Redis => {
                info!(url = %config.redis.url, "Using Redis sliding window store");
                Arc::new(RedisStore::new(&config.redis.url, config.redis.timeout())?)
            }
            StoreBackend::Memory => {
                info!("Using in-memory sliding window store");
                Arc::new(MemoryStore::new())
            }
        };

        let rl = &config.rate_limiting;
        let dependency = Arc::new(DependencyClient::new(
            store,
            config.redis.timeout(),
            BreakerSettings::from(&config.circuit_breaker),
        ));
        let limiter = Arc::new(RateLimiter::new(rl.local_limit, rl.local_window()));
        let gate = Arc::new(RequestGate::new(
            rl,
            config.redis.key_prefix.clone(),
            limiter,
            dependency,
        ));

        info!(
            limit = rl.limit,
            window_secs = rl.window_secs,
            local_limit = rl.local_limit,
            policy = ?rl.failure_policy,
            scope = ?rl.scope,
            "Request gate initialized"
        );

        Ok(Self::new(gate, rl.scope))
    }
}
