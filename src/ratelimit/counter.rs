//! Fixed-window rate counter.

use std::time::{Duration, Instant};

/// A fixed counting window for a single scope.
///
/// The count never exceeds the limit while the window is open: a request
/// that arrives when the window is full is denied and not counted.
#[derive(Debug, Clone)]
pub struct RateWindow {
    /// Requests admitted in the current window
    count: u64,
    /// The limit for this window
    limit: u64,
    /// Length of the window
    window: Duration,
    /// When the current window started
    window_start: Instant,
}

impl RateWindow {
    /// Create a new window starting at `now`.
    pub fn new(limit: u64, window: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            limit,
            window,
            window_start: now,
        }
    }

    /// Count one request at `now` if the window has room.
    ///
    /// Returns `true` if the request is within the limit, `false` if over limit.
    pub fn try_increment(&mut self, now: Instant) -> bool {
        self.maybe_reset(now);

        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }

    /// Get the current count as of `now`.
    pub fn current_count(&mut self, now: Instant) -> u64 {
        self.maybe_reset(now);
        self.count
    }

    /// Get the remaining quota as of `now`.
    pub fn remaining(&mut self, now: Instant) -> u64 {
        self.maybe_reset(now);
        self.limit.saturating_sub(self.count)
    }

    /// Get the limit for this window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.window_start);
        self.window.saturating_sub(elapsed)
    }

    /// Whether the window has fully elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }

    fn maybe_reset(&mut self, now: Instant) {
        if self.is_expired(now) {
            self.count = 0;
            self.window_start = now;
        }
    }
}
