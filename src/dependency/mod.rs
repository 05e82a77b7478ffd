//! Access to the external store and classification of its failures.

mod breaker;
mod client;

pub use breaker::{BreakerPermit, BreakerSettings, BreakerState, CircuitBreaker};
pub use client::DependencyClient;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// A classified failure of a dependency call.
///
/// The client never turns these into HTTP status codes; the gate decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyFailure {
    /// The store could not be reached or dropped the connection
    #[error("connection error: {0}")]
    Connection(String),

    /// The call did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker rejected the call without attempting it
    #[error("circuit breaker open")]
    CircuitOpen,

    /// Any other store error
    #[error("dependency error: {0}")]
    Other(String),
}

impl DependencyFailure {
    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DependencyFailure::Connection(_) => "connection",
            DependencyFailure::Timeout(_) => "timeout",
            DependencyFailure::CircuitOpen => "circuit_open",
            DependencyFailure::Other(_) => "other",
        }
    }
}

/// Availability of the dependency as observed by the last call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyHealth {
    /// No call has been attempted yet
    Unknown,
    /// The last attempt succeeded
    Available,
    /// The last attempt failed
    Unavailable,
}
