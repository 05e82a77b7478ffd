//! Token bucket used while the backing store is unavailable.

use parking_lot::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A thread-safe token bucket.
///
/// The bucket starts full and refills continuously at `rate` tokens per
/// second, never holding more than `capacity` tokens.
pub struct TokenBucket {
    capacity: u64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket refilling at `rate` tokens per second.
    pub fn new(rate: u64, capacity: u64) -> Self {
        Self {
            capacity,
            rate: rate as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Take one token at `now` if available.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if now > state.last_refill {
            state.last_refill = now;
        }

        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity as f64);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}
