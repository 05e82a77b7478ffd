//! In-process rate limiting state.

mod counter;
mod limiter;
mod scope;
mod token_bucket;

pub use counter::RateWindow;
pub use limiter::{Admission, RateLimiter};
pub use scope::{Scope, ScopeMode};
pub use token_bucket::TokenBucket;
