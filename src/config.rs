//! Configuration management for Gatekeep.
//!
//! Settings come from an optional YAML document with environment variables
//! layered on top. Default limits are flat keys so that the usual variable
//! names (`DEFAULT_IP_REQUEST_LIMIT` and friends) map onto them directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeepError, Result};
use crate::ratelimit::{lenient_section, LimitPolicies, LimitPolicy, RateLimitOverrides};

/// Main configuration for the Gatekeep service.
#[derive(Debug, Clone, Deserialize)]
pub struct GatekeepConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Address of the Redis counter store; the in-memory store is used when unset
    #[serde(default)]
    pub redis_addr: Option<String>,

    #[serde(default = "default_request_limit")]
    pub default_ip_request_limit: u64,
    #[serde(default = "default_expiration_time")]
    pub default_ip_expiration_time: u64,
    #[serde(default = "default_block_duration")]
    pub default_ip_block_duration: u64,

    #[serde(default = "default_request_limit")]
    pub default_token_request_limit: u64,
    #[serde(default = "default_expiration_time")]
    pub default_token_expiration_time: u64,
    #[serde(default = "default_block_duration")]
    pub default_token_block_duration: u64,

    /// Per-IP and per-token overrides
    #[serde(default, deserialize_with = "lenient_section")]
    pub rate_limit: RateLimitOverrides,
}

impl Default for GatekeepConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis_addr: None,
            default_ip_request_limit: default_request_limit(),
            default_ip_expiration_time: default_expiration_time(),
            default_ip_block_duration: default_block_duration(),
            default_token_request_limit: default_request_limit(),
            default_token_expiration_time: default_expiration_time(),
            default_token_block_duration: default_block_duration(),
            rate_limit: RateLimitOverrides::default(),
        }
    }
}

fn default_request_limit() -> u64 {
    10
}

fn default_expiration_time() -> u64 {
    1
}

fn default_block_duration() -> u64 {
    60
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// How often the in-memory store sweeps expired counters, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_purge_interval() -> u64 {
    30
}

impl GatekeepConfig {
    /// Load configuration from an optional YAML file plus the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading variables from `env` instead of the process
    /// environment when it is given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(false));
        }

        let config: GatekeepConfig = builder
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| GatekeepError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string, without the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeepConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeepError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default policy for IP identities.
    pub fn ip_defaults(&self) -> LimitPolicy {
        LimitPolicy::new(
            self.default_ip_request_limit,
            self.default_ip_expiration_time,
            self.default_ip_block_duration,
        )
    }

    /// Default policy for token identities.
    pub fn token_defaults(&self) -> LimitPolicy {
        LimitPolicy::new(
            self.default_token_request_limit,
            self.default_token_expiration_time,
            self.default_token_block_duration,
        )
    }

    /// Build the immutable policy table handed to the rate limiter.
    pub fn policies(&self) -> Arc<LimitPolicies> {
        Arc::new(
            LimitPolicies::new(self.ip_defaults(), self.token_defaults())
                .with_overrides(self.rate_limit.clone()),
        )
    }

    /// Defaults have nothing to fall back to, so zero values are rejected.
    fn validate(&self) -> Result<()> {
        let defaults = [
            ("default_ip_request_limit", self.default_ip_request_limit),
            ("default_ip_expiration_time", self.default_ip_expiration_time),
            ("default_ip_block_duration", self.default_ip_block_duration),
            ("default_token_request_limit", self.default_token_request_limit),
            ("default_token_expiration_time", self.default_token_expiration_time),
            ("default_token_block_duration", self.default_token_block_duration),
        ];

        if let Some((name, _)) = defaults.iter().find(|(_, value)| *value == 0) {
            return Err(GatekeepError::Config(format!("{} must be a positive integer", name)));
        }

        if self.server.purge_interval_secs == 0 {
            return Err(GatekeepError::Config(
                "server.purge_interval_secs must be a positive integer".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::IdentityKind;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = GatekeepConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.ip_defaults(), LimitPolicy::new(10, 1, 60));
        assert_eq!(config.token_defaults(), LimitPolicy::new(10, 1, 60));
        assert!(config.redis_addr.is_none());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  listen_addr: 127.0.0.1:9000
redis_addr: localhost:6379
default_ip_request_limit: 1
default_ip_expiration_time: 10
default_ip_block_duration: 10
default_token_request_limit: 2
rate_limit:
  ips:
    - ip: 192.168.1.1
      limit: 100
  tokens:
    - token: tokenPotato
      limit: 50
      block: 120
"#;
        let config = GatekeepConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.redis_addr.as_deref(), Some("localhost:6379"));
        assert_eq!(config.ip_defaults(), LimitPolicy::new(1, 10, 10));
        assert_eq!(config.token_defaults(), LimitPolicy::new(2, 1, 60));

        let policies = config.policies();
        assert_eq!(
            policies.resolve("192.168.1.1", IdentityKind::Ip),
            LimitPolicy::new(100, 10, 10)
        );
        assert_eq!(
            policies.resolve("tokenPotato", IdentityKind::Token),
            LimitPolicy::new(50, 1, 120)
        );
    }

    #[test]
    fn test_malformed_rate_limit_section_is_ignored() {
        let config = GatekeepConfig::from_yaml("rate_limit: nonsense\n").unwrap();
        assert_eq!(config.rate_limit, RateLimitOverrides::default());
    }

    #[test]
    fn test_zero_default_rejected() {
        let result = GatekeepConfig::from_yaml("default_token_block_duration: 0\n");
        assert!(matches!(result, Err(GatekeepError::Config(msg)) if msg.contains("default_token_block_duration")));
    }

    #[test]
    fn test_environment_supplies_defaults() {
        let config = GatekeepConfig::load_with_env(
            None,
            env(&[
                ("DEFAULT_IP_EXPIRATION_TIME", "10"),
                ("DEFAULT_TOKEN_EXPIRATION_TIME", "5"),
                ("DEFAULT_IP_REQUEST_LIMIT", "1"),
                ("DEFAULT_TOKEN_REQUEST_LIMIT", "2"),
                ("DEFAULT_IP_BLOCK_DURATION", "10"),
                ("DEFAULT_TOKEN_BLOCK_DURATION", "5"),
                ("REDIS_ADDR", "redis:6379"),
                ("SERVER__LISTEN_ADDR", "127.0.0.1:8181"),
            ]),
        )
        .unwrap();

        assert_eq!(config.ip_defaults(), LimitPolicy::new(1, 10, 10));
        assert_eq!(config.token_defaults(), LimitPolicy::new(2, 5, 5));
        assert_eq!(config.redis_addr.as_deref(), Some("redis:6379"));
        assert_eq!(config.server.listen_addr, "127.0.0.1:8181".parse().unwrap());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_ip_request_limit: 3\nrate_limit:\n  ips:\n    - ip: 10.0.0.1\n      expiration: 30\n"
        )
        .unwrap();

        let config = GatekeepConfig::load_with_env(
            Some(file.path()),
            env(&[("DEFAULT_IP_REQUEST_LIMIT", "7")]),
        )
        .unwrap();

        assert_eq!(config.default_ip_request_limit, 7);
        assert_eq!(
            config.policies().resolve("10.0.0.1", IdentityKind::Ip),
            LimitPolicy::new(7, 30, 60)
        );
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config = GatekeepConfig::load_with_env(
            Some(Path::new("/nonexistent/gatekeep.yaml")),
            env(&[]),
        )
        .unwrap();
        assert_eq!(config.ip_defaults(), LimitPolicy::new(10, 1, 60));
    }

    #[test]
    fn test_non_numeric_default_rejected() {
        let result = GatekeepConfig::load_with_env(None, env(&[("DEFAULT_IP_REQUEST_LIMIT", "many")]));
        assert!(matches!(result, Err(GatekeepError::Config(_))));
    }
}
