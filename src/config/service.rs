use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// Container settings for the database service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Image reference to run.
    pub image: String,
    /// Explicit container name (runtime default when unset).
    pub container_name: Option<String>,
    /// Host interface the database port is published on.
    pub host: String,
    /// Host port.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
    /// Pull the image when missing.
    pub auto_pull: bool,
    /// Seconds to wait for readiness before giving up.
    pub startup_timeout_secs: u64,
    /// Seconds given to the container to stop before it is killed.
    pub stop_timeout_secs: u64,
    /// Forward container output to the log.
    pub forward_logs: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image: "postgres:16-alpine".to_string(),
            container_name: None,
            host: "127.0.0.1".to_string(),
            host_port: 5432,
            container_port: 5432,
            auto_pull: true,
            startup_timeout_secs: 60,
            stop_timeout_secs: 10,
            forward_logs: true,
        }
    }
}

impl ServiceConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host_port = parse_optional_env("HARNESS_HOST_PORT", defaults.host_port)?;
        if host_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARNESS_HOST_PORT".to_string(),
                message: "must be a fixed port, not 0".to_string(),
            });
        }

        Ok(Self {
            image: optional_env("HARNESS_IMAGE")?.unwrap_or(defaults.image),
            container_name: optional_env("HARNESS_CONTAINER_NAME")?,
            host: optional_env("HARNESS_HOST")?.unwrap_or(defaults.host),
            host_port,
            container_port: parse_optional_env(
                "HARNESS_CONTAINER_PORT",
                defaults.container_port,
            )?,
            auto_pull: parse_bool_env("HARNESS_AUTO_PULL", defaults.auto_pull)?,
            startup_timeout_secs: parse_optional_env(
                "HARNESS_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout_secs,
            )?,
            stop_timeout_secs: parse_optional_env(
                "HARNESS_STOP_TIMEOUT_SECS",
                defaults.stop_timeout_secs,
            )?,
            forward_logs: parse_bool_env("HARNESS_FORWARD_LOGS", defaults.forward_logs)?,
        })
    }
}
