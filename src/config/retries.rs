use crate::config::helpers::{parse_env, parse_optional_env};
use crate::error::ConfigError;

/// Readiness check tuning.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Dial attempts before the port check gives up.
    pub port_max_attempts: u32,
    /// Delay between dials in milliseconds.
    pub port_retry_ms: u64,
    /// Bound on a single dial in milliseconds.
    pub dial_timeout_ms: u64,
    /// Delay between health pings in milliseconds.
    pub ping_retry_ms: u64,
    /// Cap on health pings; `None` keeps pinging until the startup timeout.
    pub ping_max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            port_max_attempts: 10,
            port_retry_ms: 100,
            dial_timeout_ms: 1000,
            ping_retry_ms: 500,
            ping_max_attempts: None,
        }
    }
}

impl RetryConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port_max_attempts =
            parse_optional_env("HARNESS_PORT_MAX_ATTEMPTS", defaults.port_max_attempts)?;
        if port_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARNESS_PORT_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port_max_attempts,
            port_retry_ms: parse_optional_env("HARNESS_PORT_RETRY_MS", defaults.port_retry_ms)?,
            dial_timeout_ms: parse_optional_env(
                "HARNESS_DIAL_TIMEOUT_MS",
                defaults.dial_timeout_ms,
            )?,
            ping_retry_ms: parse_optional_env("HARNESS_PING_RETRY_MS", defaults.ping_retry_ms)?,
            ping_max_attempts: parse_env("HARNESS_PING_MAX_ATTEMPTS")?,
        })
    }
}
