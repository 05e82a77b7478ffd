//! Dependency client: timeout, circuit breaking and health tracking around a store.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::breaker::{BreakerSettings, BreakerState, CircuitBreaker};
use super::{DependencyFailure, DependencyHealth};
use crate::metrics::{DEPENDENCY_AVAILABLE, DEPENDENCY_FAILURES_TOTAL};
use crate::store::{RateStore, StoreRequest, StoreVerdict};

/// Wraps calls to the external store and classifies their outcome.
pub struct DependencyClient {
    store: Arc<dyn RateStore>,
    breaker: CircuitBreaker,
    timeout: Duration,
    health: RwLock<DependencyHealth>,
}

impl DependencyClient {
    /// Create a client around `store`.
    pub fn new(store: Arc<dyn RateStore>, timeout: Duration, breaker: BreakerSettings) -> Self {
        let breaker = CircuitBreaker::new(store.name(), breaker);
        Self {
            store,
            breaker,
            timeout,
            health: RwLock::new(DependencyHealth::Unknown),
        }
    }

    /// Perform one store call.
    ///
    /// Every failure is returned classified; this method never panics on a
    /// store error.
    pub async fn call(&self, request: &StoreRequest) -> Result<StoreVerdict, DependencyFailure> {
        let Some(permit) = self.breaker.try_acquire_at(Instant::now()) else {
            debug!(store = self.store.name(), "Circuit open, skipping store call");
            DEPENDENCY_FAILURES_TOTAL
                .with_label_values(&[DependencyFailure::CircuitOpen.reason()])
                .inc();
            return Err(DependencyFailure::CircuitOpen);
        };

        let outcome = match tokio::time::timeout(self.timeout, self.store.record(request)).await {
            Ok(result) => result,
            Err(_) => Err(DependencyFailure::Timeout(self.timeout)),
        };

        let now = Instant::now();
        match &outcome {
            Ok(_) => {
                permit.success(now);
                self.set_health(DependencyHealth::Available);
            }
            Err(failure) => {
                warn!(
                    store = self.store.name(),
                    key = %request.key,
                    reason = failure.reason(),
                    error = %failure,
                    "Store call failed"
                );
                DEPENDENCY_FAILURES_TOTAL
                    .with_label_values(&[failure.reason()])
                    .inc();
                permit.failure(now);
                self.set_health(DependencyHealth::Unavailable);
            }
        }

        outcome
    }

    /// Drop store state that has aged out at `now_ms` (unix milliseconds).
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        self.store.purge_expired(now_ms)
    }

    /// Health observed by the last call attempt.
    pub fn health(&self) -> DependencyHealth {
        *self.health.read()
    }

    /// Current circuit breaker state.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Name of the wrapped store.
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn set_health(&self, health: DependencyHealth) {
        let mut current = self.health.write();
        if *current != health {
            debug!(store = self.store.name(), health = ?health, "Dependency health changed");
        }
        *current = health;
        DEPENDENCY_AVAILABLE.set(i64::from(health == DependencyHealth::Available));
    }
}
