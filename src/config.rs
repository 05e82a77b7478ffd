//! Configuration management for the gateway.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::dependency::BreakerSettings;
use crate::error::{GatewayError, Result};
use crate::gate::FailurePolicy;
use crate::ratelimit::ScopeMode;

/// Prefix for environment overrides, e.g. `GATEWAY__SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "GATEWAY";

/// Main configuration for the gateway service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing store configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Which store backs the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Shared Redis instance
    #[default]
    Redis,
    /// Process-local memory, for single-node deployments
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix for per-scope keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    /// Store call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// How requests are grouped into scopes
    #[serde(default)]
    pub scope: ScopeMode,

    /// Requests per window enforced by the store
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Store window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests per window enforced in-process before the store is consulted
    #[serde(default = "default_local_limit")]
    pub local_limit: u64,

    /// In-process window length in seconds
    #[serde(default = "default_local_window_secs")]
    pub local_window_secs: u64,

    /// What to do when the store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Fallback refill rate in tokens per second
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: u64,

    /// Fallback bucket capacity
    #[serde(default = "default_fallback_capacity")]
    pub fallback_capacity: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            scope: ScopeMode::default(),
            limit: default_limit(),
            window_secs: default_window_secs(),
            local_limit: default_local_limit(),
            local_window_secs: default_local_window_secs(),
            failure_policy: FailurePolicy::default(),
            fallback_rate: default_fallback_rate(),
            fallback_capacity: default_fallback_capacity(),
        }
    }
}

impl RateLimitingConfig {
    /// Store window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// In-process window length.
    pub fn local_window(&self) -> Duration {
        Duration::from_secs(self.local_window_secs)
    }
}

fn default_limit() -> u64 {
    5
}

fn default_window_secs() -> u64 {
    10
}

fn default_local_limit() -> u64 {
    100
}

fn default_local_window_secs() -> u64 {
    1
}

fn default_fallback_rate() -> u64 {
    5
}

fn default_fallback_capacity() -> u64 {
    5
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Minimum requests observed before tripping
    #[serde(default = "default_min_requests")]
    pub min_requests: u64,

    /// Failure ratio that trips the breaker
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,

    /// Seconds the breaker stays open
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Probes allowed while half-open
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: default_min_requests(),
            failure_ratio: default_failure_ratio(),
            open_timeout_secs: default_open_timeout_secs(),
            half_open_max_requests: default_half_open_max_requests(),
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            min_requests: config.min_requests,
            failure_ratio: config.failure_ratio,
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            half_open_max_requests: config.half_open_max_requests,
        }
    }
}

fn default_min_requests() -> u64 {
    3
}

fn default_failure_ratio() -> f64 {
    0.6
}

fn default_open_timeout_secs() -> u64 {
    5
}

fn default_half_open_max_requests() -> u64 {
    1
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `ratelimit_gateway=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load configuration from an optional YAML file and the environment.
    ///
    /// `GATEWAY__<SECTION>__<FIELD>` variables override the file, and
    /// `REDIS_ADDR` (`host:port`) overrides the Redis URL.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: GatewayConfig = builder.build()?.try_deserialize()?;
        if let Ok(addr) = std::env::var("REDIS_ADDR") {
            config.apply_redis_addr(&addr);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Point the Redis URL at `host:port`.
    pub fn apply_redis_addr(&mut self, addr: &str) {
        let addr = addr.trim();
        if !addr.is_empty() {
            self.redis.url = format!("redis://{}", addr);
        }
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.limit == 0 || rl.local_limit == 0 {
            return Err(GatewayError::Config("limits must be greater than zero".into()));
        }
        if rl.window_secs == 0 || rl.local_window_secs == 0 {
            return Err(GatewayError::Config("windows must be at least one second".into()));
        }
        if rl.fallback_capacity == 0 {
            return Err(GatewayError::Config(
                "fallback_capacity must be greater than zero".into(),
            ));
        }
        if self.redis.timeout_ms == 0 {
            return Err(GatewayError::Config("redis.timeout_ms must be greater than zero".into()));
        }
        let ratio = self.circuit_breaker.failure_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(GatewayError::Config(format!(
                "circuit_breaker.failure_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        let cb = &self.circuit_breaker;
        if cb.min_requests == 0 {
            return Err(GatewayError::Config(
                "circuit_breaker.min_requests must be greater than zero".into(),
            ));
        }
        if cb.open_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "circuit_breaker.open_timeout_secs must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();

        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.redis.backend, StoreBackend::Redis);
        assert_eq!(config.rate_limiting.limit, 5);
        assert_eq!(config.rate_limiting.window(), Duration::from_secs(10));
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::Fallback);
        assert_eq!(config.circuit_breaker.min_requests, 3);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  http_addr: "127.0.0.1:9000"
rate_limiting:
  scope: global
  limit: 20
  failure_policy: fail_closed
circuit_breaker:
  open_timeout_secs: 30
logging:
  format: json
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.scope, ScopeMode::Global);
        assert_eq!(config.rate_limiting.limit, 20);
        assert_eq!(config.rate_limiting.window_secs, 10);
        assert_eq!(config.rate_limiting.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(config.logging.format, LogFormat::Json);

        let settings = BreakerSettings::from(&config.circuit_breaker);
        assert_eq!(settings.open_timeout, Duration::from_secs(30));
        assert_eq!(settings.min_requests, 3);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.rate_limiting.fallback_rate, 5);
        assert_eq!(config.redis.key_prefix, "ratelimit:");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let yaml = "rate_limiting:\n  limit: 0\n";
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(GatewayError::Config(_))
        ));

        let mut config = GatewayConfig::default();
        config.circuit_breaker.failure_ratio = 1.5;
        tokio_test::assert_err!(config.validate());

        let mut config = GatewayConfig::default();
        config.redis.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_degenerate_breaker() {
        let yaml = "circuit_breaker:\n  open_timeout_secs: 0\n";
        assert!(matches!(
            GatewayConfig::from_yaml(yaml),
            Err(GatewayError::Config(msg)) if msg.contains("open_timeout_secs")
        ));

        let mut config = GatewayConfig::default();
        config.circuit_breaker.min_requests = 0;
        tokio_test::assert_err!(config.validate());

        config.circuit_breaker.min_requests = 1;
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_apply_redis_addr() {
        let mut config = GatewayConfig::default();
        config.apply_redis_addr("localhost:6390");
        assert_eq!(config.redis.url, "redis://localhost:6390");

        config.apply_redis_addr("  ");
        assert_eq!(config.redis.url, "redis://localhost:6390");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gateway-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "rate_limiting:\n  limit: 42\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.rate_limiting.limit, 42);

        let loaded = GatewayConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.rate_limiting.limit, 42);

        std::fs::remove_file(&path).unwrap();
    }
}
