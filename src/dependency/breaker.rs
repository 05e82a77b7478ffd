//! Circuit breaker guarding the external store.
//!
//! ```text
//! Closed   -> Open:     requests >= min_requests && failures/requests >= failure_ratio
//! Open     -> HalfOpen: open_timeout elapsed
//! HalfOpen -> Closed:   a probe succeeds
//! HalfOpen -> Open:     a probe fails or is abandoned
//! ```
//!
//! Counts are cleared on every state change and never while closed.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Minimum observed requests before the breaker may trip
    pub min_requests: u64,
    /// Failure ratio at or above which the breaker trips
    pub failure_ratio: f64,
    /// How long the breaker stays open
    pub open_timeout: Duration,
    /// Probes admitted while half-open
    pub half_open_max_requests: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            min_requests: 3,
            failure_ratio: 0.6,
            open_timeout: Duration::from_secs(5),
            half_open_max_requests: 1,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct Counts {
    requests: u64,
    failures: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Bumped on every state change
    generation: u64,
    counts: Counts,
    opened_at: Option<Instant>,
}

/// A three-state circuit breaker.
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Resolve it with [`success`] or [`failure`]. A permit dropped unresolved,
/// for instance because the calling future was cancelled, counts as a
/// failure so a half-open slot is never held forever. Outcomes from a
/// generation the breaker has since left are ignored.
///
/// [`success`]: BreakerPermit::success
/// [`failure`]: BreakerPermit::failure
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    resolved: bool,
}

impl BreakerPermit<'_> {
    /// Record a successful call at `now`.
    pub fn success(mut self, now: Instant) {
        self.resolved = true;
        self.breaker.on_success(self.generation, now);
    }

    /// Record a failed call at `now`.
    pub fn failure(mut self, now: Instant) {
        self.resolved = true;
        self.breaker.on_failure(self.generation, now);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            debug!(breaker = %self.breaker.name, "Call abandoned, counting as failure");
            self.breaker.on_failure(self.generation, Instant::now());
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                opened_at: None,
            }),
        }
    }

    /// Current state as of `now`.
    pub fn state_at(&self, now: Instant) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.state_at(Instant::now())
    }

    /// Ask permission to attempt a call at `now`.
    pub fn try_acquire_at(&self, now: Instant) -> Option<BreakerPermit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Open => None,
            BreakerState::HalfOpen
                if inner.counts.requests >= self.settings.half_open_max_requests.max(1) =>
            {
                None
            }
            _ => {
                inner.counts.requests += 1;
                Some(BreakerPermit {
                    breaker: self,
                    generation: inner.generation,
                    resolved: false,
                })
            }
        }
    }

    fn on_success(&self, generation: u64, now: Instant) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        if inner.state == BreakerState::HalfOpen {
            info!(breaker = %self.name, "Probe succeeded, closing circuit");
            self.transition(&mut inner, BreakerState::Closed, now);
        }
    }

    fn on_failure(&self, generation: u64, now: Instant) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        if inner.generation != generation {
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.counts.failures += 1;
                if self.ready_to_trip(&inner.counts) {
                    warn!(
                        breaker = %self.name,
                        requests = inner.counts.requests,
                        failures = inner.counts.failures,
                        "Failure ratio exceeded, opening circuit"
                    );
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => {
                warn!(breaker = %self.name, "Probe failed, reopening circuit");
                self.transition(&mut inner, BreakerState::Open, now);
            }
            BreakerState::Open => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.settings.min_requests
            && counts.failures as f64 / counts.requests as f64 >= self.settings.failure_ratio
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state != BreakerState::Open {
            return;
        }
        let expired = inner
            .opened_at
            .map(|at| now.saturating_duration_since(at) >= self.settings.open_timeout)
            .unwrap_or(true);
        if expired {
            info!(breaker = %self.name, "Open timeout elapsed, half-opening circuit");
            self.transition(inner, BreakerState::HalfOpen, now);
        }
    }

    fn transition(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        inner.state = state;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.opened_at = (state == BreakerState::Open).then_some(now);
    }
}
