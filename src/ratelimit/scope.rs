//! Rate limit scope keys.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// How inbound requests are grouped for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// One scope per client IP address
    #[default]
    PerClient,
    /// A single scope shared by every client
    Global,
}

/// A key that identifies the bucket a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// All requests share one bucket
    Global,
    /// Requests are bucketed by client address
    Client(IpAddr),
}

impl Scope {
    /// Build the scope for a request coming from `ip`.
    pub fn for_client(mode: ScopeMode, ip: IpAddr) -> Self {
        match mode {
            ScopeMode::PerClient => Scope::Client(ip),
            ScopeMode::Global => Scope::Global,
        }
    }

    /// Convert the scope to its string identifier.
    pub fn to_string_key(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Client(ip) => ip.to_string(),
        }
    }

    /// The key under which this scope's requests are stored.
    pub fn store_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.to_string_key())
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
