//! Ratelimit Gateway - HTTP admission control in front of a fallible store
//!
//! Each request passes an in-process rate limiter, then a sliding-window
//! check in Redis guarded by a timeout and a circuit breaker. When Redis is
//! unavailable an explicit failure policy decides between failing closed,
//! failing open, or admitting at a bounded fallback rate.

pub mod config;
pub mod dependency;
pub mod error;
pub mod gate;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod store;
