//! In-process rate limiter.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::counter::RateWindow;
use super::scope::Scope;

/// Outcome of a local admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request fits in the current window
    pub allowed: bool,
    /// Configured threshold
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Per-scope fixed-window rate limiter.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    /// Windows indexed by scope
    windows: DashMap<Scope, RateWindow>,
    /// Requests allowed per window
    limit: u64,
    /// Window length
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `limit` requests per `window`.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Admit or deny one request for `scope` at `now`.
    ///
    /// The scope's counter is incremented only when the request is admitted.
    pub fn admit(&self, scope: &Scope, now: Instant) -> Admission {
        trace!(scope = %scope, "Checking local rate limit");

        let mut window = self.windows.entry(scope.clone()).or_insert_with(|| {
            debug!(
                scope = %scope,
                limit = self.limit,
                window = ?self.window,
                "Creating new rate window"
            );
            RateWindow::new(self.limit, self.window, now)
        });

        let allowed = window.try_increment(now);
        if !allowed {
            debug!(scope = %scope, "Local rate limit exceeded");
        }

        Admission {
            allowed,
            limit: window.limit(),
            remaining: window.remaining(now),
            reset_after: window.duration_until_reset(now),
        }
    }

    /// Drop windows that have fully elapsed at `now`.
    ///
    /// Returns the number of scopes removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Purged expired rate windows");
        }
        removed
    }

    #[cfg(test)]
    fn current_count(&self, scope: &Scope, now: Instant) -> Option<u64> {
        self.windows
            .get_mut(scope)
            .map(|mut window| window.current_count(now))
    }

    /// Get the number of tracked scopes.
    pub fn scope_count(&self) -> usize {
        self.windows.len()
    }
}
