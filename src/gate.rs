//! Request gate: the admission decision for one inbound request.
//!
//! The local rate limiter is consulted first. A request it admits is then
//! recorded in the sliding-window store through the dependency client. When
//! the store cannot be reached the configured [`FailurePolicy`] decides.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RateLimitingConfig;
use crate::dependency::{DependencyClient, DependencyFailure};
use crate::metrics::{REQUESTS_TOTAL, REQUEST_LATENCY};
use crate::ratelimit::{RateLimiter, Scope, TokenBucket};
use crate::store::StoreRequest;

/// Behavior when the backing store is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Answer 500
    FailClosed,
    /// Admit every request
    FailOpen,
    /// Admit at the rate of a process-local token bucket
    #[default]
    Fallback,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "fail_closed" => Ok(FailurePolicy::FailClosed),
            "fail_open" => Ok(FailurePolicy::FailOpen),
            "fallback" => Ok(FailurePolicy::Fallback),
            other => Err(format!(
                "unknown failure policy '{}', expected fail_closed, fail_open or fallback",
                other
            )),
        }
    }
}

/// Which component produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// In-process rate limiter
    Local,
    /// Sliding-window store
    Store,
    /// Fallback token bucket
    Fallback,
    /// Store unavailable, admitted unconditionally
    FailOpen,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Local => "local",
            Mechanism::Store => "store",
            Mechanism::Fallback => "fallback",
            Mechanism::FailOpen => "fail_open",
        }
    }
}

/// Quota information reported with a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// Unix milliseconds, 0 when unknown
    pub reset_ms: i64,
    pub mechanism: Mechanism,
}

/// The gate's decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Serve the request
    Admitted(Quota),
    /// Over a limit
    Rejected(Quota),
    /// The store failed and the policy is fail-closed
    Failed(DependencyFailure),
}

impl GateDecision {
    /// HTTP status code for this decision.
    pub fn status_code(&self) -> u16 {
        match self {
            GateDecision::Admitted(_) => 200,
            GateDecision::Rejected(_) => 429,
            GateDecision::Failed(_) => 500,
        }
    }

    /// Quota to report, if any.
    pub fn quota(&self) -> Option<&Quota> {
        match self {
            GateDecision::Admitted(quota) | GateDecision::Rejected(quota) => Some(quota),
            GateDecision::Failed(_) => None,
        }
    }
}

/// Orchestrates the admission decision for each request.
pub struct RequestGate {
    limiter: Arc<RateLimiter>,
    dependency: Arc<DependencyClient>,
    fallback: TokenBucket,
    policy: FailurePolicy,
    limit: u64,
    window: Duration,
    key_prefix: String,
}

impl RequestGate {
    /// Create a gate from its collaborators and the rate limiting settings.
    pub fn new(
        config: &RateLimitingConfig,
        key_prefix: impl Into<String>,
        limiter: Arc<RateLimiter>,
        dependency: Arc<DependencyClient>,
    ) -> Self {
        Self {
            limiter,
            dependency,
            fallback: TokenBucket::new(config.fallback_rate, config.fallback_capacity),
            policy: config.failure_policy,
            limit: config.limit,
            window: config.window(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Decide whether a request in `scope` is admitted.
    pub async fn handle(&self, scope: &Scope) -> GateDecision {
        let started = Instant::now();
        let decision = self.decide(scope, started).await;
        REQUEST_LATENCY.observe(started.elapsed().as_secs_f64());

        if let Some(quota) = decision.quota() {
            let status = match decision {
                GateDecision::Admitted(_) => "allowed",
                _ => "blocked",
            };
            REQUESTS_TOTAL
                .with_label_values(&[status, quota.mechanism.as_str()])
                .inc();
        }

        decision
    }

    async fn decide(&self, scope: &Scope, now: Instant) -> GateDecision {
        let admission = self.limiter.admit(scope, now);
        if !admission.allowed {
            debug!(scope = %scope, "Rejected by local limiter");
            return GateDecision::Rejected(Quota {
                limit: admission.limit,
                remaining: admission.remaining,
                reset_ms: unix_ms_after(admission.reset_after),
                mechanism: Mechanism::Local,
            });
        }

        let request = StoreRequest::now(
            scope.store_key(&self.key_prefix),
            self.window.as_millis() as i64,
            self.limit,
        );

        match self.dependency.call(&request).await {
            Ok(verdict) => {
                let quota = Quota {
                    limit: verdict.limit,
                    remaining: verdict.remaining,
                    reset_ms: verdict.reset_ms,
                    mechanism: Mechanism::Store,
                };
                if verdict.allowed {
                    GateDecision::Admitted(quota)
                } else {
                    debug!(scope = %scope, "Rejected by store");
                    GateDecision::Rejected(quota)
                }
            }
            Err(failure) => self.on_failure(scope, failure),
        }
    }

    fn on_failure(&self, scope: &Scope, failure: DependencyFailure) -> GateDecision {
        match self.policy {
            FailurePolicy::FailClosed => {
                warn!(scope = %scope, error = %failure, "Store unavailable, failing closed");
                GateDecision::Failed(failure)
            }
            FailurePolicy::FailOpen => {
                debug!(scope = %scope, error = %failure, "Store unavailable, failing open");
                GateDecision::Admitted(Quota {
                    limit: self.limit,
                    remaining: self.limit,
                    reset_ms: 0,
                    mechanism: Mechanism::FailOpen,
                })
            }
            FailurePolicy::Fallback => {
                let allowed = self.fallback.try_acquire();
                debug!(scope = %scope, allowed, error = %failure, "Store unavailable, using fallback bucket");
                let quota = Quota {
                    limit: self.fallback.rate(),
                    remaining: u64::from(allowed),
                    reset_ms: 0,
                    mechanism: Mechanism::Fallback,
                };
                if allowed {
                    GateDecision::Admitted(quota)
                } else {
                    GateDecision::Rejected(quota)
                }
            }
        }
    }

    /// The dependency client behind this gate.
    pub fn dependency(&self) -> &DependencyClient {
        &self.dependency
    }

    /// The local rate limiter behind this gate.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The bucket used under [`FailurePolicy::Fallback`].
    pub fn fallback(&self) -> &TokenBucket {
        &self.fallback
    }

    /// The configured failure policy.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }
}

fn unix_ms_after(after: Duration) -> i64 {
    chrono::Utc::now().timestamp_millis() + after.as_millis() as i64
}
