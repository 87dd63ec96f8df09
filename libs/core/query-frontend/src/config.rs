//! Frontend configuration
//!
//! Loaded from environment variables with builder-style overrides. The only
//! cross-field rule is discovery-mode coherence: a static scheduler address
//! and ring discovery are mutually exclusive.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error(
        "scheduler address cannot be specified when query-scheduler service discovery mode is set to 'ring'"
    )]
    SchedulerAddressWithRingDiscovery,

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// How scheduler addresses reach the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// A static `scheduler_address`, resolved through DNS.
    #[default]
    Dns,
    /// Addresses arrive dynamically from ring-based service discovery;
    /// `scheduler_address` must stay empty.
    Ring,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Ring => "ring",
        }
    }
}

impl FromStr for DiscoveryMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dns" => Ok(Self::Dns),
            "ring" => Ok(Self::Ring),
            other => Err(ConfigError::ParseError {
                key: "QUERY_SCHEDULER_DISCOVERY_MODE".to_string(),
                details: format!("unknown discovery mode '{other}', expected 'dns' or 'ring'"),
            }),
        }
    }
}

/// Configuration for the query frontend
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    /// Externally reachable address of this frontend, advertised to
    /// schedulers in every INIT and ENQUEUE frame.
    pub advertised_addr: String,

    /// Port component of the advertised address.
    pub advertised_port: u16,

    /// Static scheduler endpoint; empty when discovery supplies addresses.
    pub scheduler_address: String,

    /// Streams opened per scheduler address; also the round-trip retry
    /// ceiling.
    pub worker_concurrency: usize,

    /// Bound of each worker's outbound queue. A full queue makes the pool
    /// try the next worker.
    pub worker_queue_size: usize,

    /// How scheduler addresses reach the pool.
    pub discovery_mode: DiscoveryMode,
}

impl FrontendConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `FRONTEND_ADDR`, `FRONTEND_PORT`,
    /// `SCHEDULER_ADDRESS`, `WORKER_CONCURRENCY`, `WORKER_QUEUE_SIZE`,
    /// `QUERY_SCHEDULER_DISCOVERY_MODE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            advertised_addr: env_or_default("FRONTEND_ADDR", &defaults.advertised_addr),
            advertised_port: parse_env("FRONTEND_PORT", defaults.advertised_port)?,
            scheduler_address: env_or_default("SCHEDULER_ADDRESS", &defaults.scheduler_address),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            worker_queue_size: parse_env("WORKER_QUEUE_SIZE", defaults.worker_queue_size)?,
            discovery_mode: match env::var("QUERY_SCHEDULER_DISCOVERY_MODE") {
                Ok(value) => value.parse()?,
                Err(_) => defaults.discovery_mode,
            },
        })
    }

    /// Set the static scheduler endpoint
    pub fn with_scheduler_address(mut self, address: impl Into<String>) -> Self {
        self.scheduler_address = address.into();
        self
    }

    /// Set the advertised frontend endpoint
    pub fn with_advertised(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.advertised_addr = addr.into();
        self.advertised_port = port;
        self
    }

    /// Set the per-address stream count (and retry ceiling)
    pub fn with_worker_concurrency(mut self, concurrency: usize) -> Self {
        self.worker_concurrency = concurrency;
        self
    }

    /// Set the per-worker outbound queue bound
    pub fn with_worker_queue_size(mut self, size: usize) -> Self {
        self.worker_queue_size = size.max(1);
        self
    }

    /// Set the discovery mode
    pub fn with_discovery_mode(mut self, mode: DiscoveryMode) -> Self {
        self.discovery_mode = mode;
        self
    }

    /// The "host:port" string advertised to schedulers.
    pub fn frontend_address(&self) -> String {
        format!("{}:{}", self.advertised_addr, self.advertised_port)
    }

    /// Check cross-field coherence.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_mode == DiscoveryMode::Ring && !self.scheduler_address.is_empty() {
            return Err(ConfigError::SchedulerAddressWithRingDiscovery);
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        if self.advertised_addr.is_empty() {
            return Err(ConfigError::InvalidValue(
                "advertised frontend address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            advertised_addr: "127.0.0.1".to_string(),
            advertised_port: 9008,
            scheduler_address: String::new(),
            worker_concurrency: 5,
            worker_queue_size: 8,
            discovery_mode: DiscoveryMode::Dns,
        }
    }
}

/// Helper to load an environment variable with a default value
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse an environment variable with a default value
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FrontendConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery_mode, DiscoveryMode::Dns);
        assert_eq!(config.worker_concurrency, 5);
    }

    #[test]
    fn test_ring_discovery_rejects_static_address() {
        let config = FrontendConfig::default()
            .with_discovery_mode(DiscoveryMode::Ring)
            .with_scheduler_address("localhost:9095");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(
            "scheduler address cannot be specified when query-scheduler service discovery mode is set to 'ring'"
        ));
    }

    #[test]
    fn test_ring_discovery_without_address_is_valid() {
        let config = FrontendConfig::default().with_discovery_mode(DiscoveryMode::Ring);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dns_discovery_allows_static_address() {
        let config = FrontendConfig::default().with_scheduler_address("localhost:9095");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = FrontendConfig::default().with_worker_concurrency(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker concurrency"));
    }

    #[test]
    fn test_frontend_address_format() {
        let config = FrontendConfig::default().with_advertised("10.0.0.7", 9100);
        assert_eq!(config.frontend_address(), "10.0.0.7:9100");
    }

    #[test]
    fn test_discovery_mode_parsing() {
        assert_eq!("dns".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::Dns);
        assert_eq!("ring".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::Ring);
        assert!("consul".parse::<DiscoveryMode>().is_err());
    }

    #[test]
    fn test_from_env_with_defaults() {
        temp_env::with_vars(
            [
                ("FRONTEND_ADDR", None::<&str>),
                ("FRONTEND_PORT", None),
                ("SCHEDULER_ADDRESS", None),
                ("WORKER_CONCURRENCY", None),
                ("QUERY_SCHEDULER_DISCOVERY_MODE", None),
            ],
            || {
                let config = FrontendConfig::from_env().unwrap();
                assert_eq!(config.advertised_addr, "127.0.0.1");
                assert_eq!(config.worker_concurrency, 5);
                assert_eq!(config.discovery_mode, DiscoveryMode::Dns);
            },
        );
    }

    #[test]
    fn test_from_env_with_custom_values() {
        temp_env::with_vars(
            [
                ("FRONTEND_ADDR", Some("frontend.internal")),
                ("FRONTEND_PORT", Some("9200")),
                ("SCHEDULER_ADDRESS", Some("scheduler.internal:9095")),
                ("WORKER_CONCURRENCY", Some("10")),
                ("QUERY_SCHEDULER_DISCOVERY_MODE", Some("dns")),
            ],
            || {
                let config = FrontendConfig::from_env().unwrap();
                assert_eq!(config.frontend_address(), "frontend.internal:9200");
                assert_eq!(config.scheduler_address, "scheduler.internal:9095");
                assert_eq!(config.worker_concurrency, 10);
            },
        );
    }

    #[test]
    fn test_from_env_invalid_port() {
        temp_env::with_var("FRONTEND_PORT", Some("not_a_number"), || {
            let result = FrontendConfig::from_env();
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("FRONTEND_PORT"));
        });
    }

    #[test]
    fn test_from_env_invalid_discovery_mode() {
        temp_env::with_var("QUERY_SCHEDULER_DISCOVERY_MODE", Some("gossip"), || {
            let result = FrontendConfig::from_env();
            assert!(result.is_err());
        });
    }
}
