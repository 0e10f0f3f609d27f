//! Configuration resolved from the environment.
//!
//! `.env` files are loaded by the binary before [`Config::from_env`] runs,
//! so every setting can live there or in the real environment.

mod database;
pub(crate) mod helpers;
mod retries;
mod service;

use std::time::Duration;

use secrecy::ExposeSecret;

pub use database::DatabaseConfig;
pub use retries::RetryConfig;
pub use service::ServiceConfig;

use crate::container::ServiceSpec;
use crate::error::ConfigError;
use crate::postgres::PgConnector;
use crate::readiness::{HealthWaiter, PortWaiter, Readiness, RetryPolicy};

/// Full harness configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub retries: RetryConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service: ServiceConfig::resolve()?,
            retries: RetryConfig::resolve()?,
            database: DatabaseConfig::resolve()?,
        })
    }

    /// The container to provision, with database credentials in its env.
    pub fn service_spec(&self) -> ServiceSpec {
        ServiceSpec {
            image: self.service.image.clone(),
            name: self.service.container_name.clone(),
            container_port: self.service.container_port,
            host_ip: self.service.host.clone(),
            host_port: self.service.host_port,
            env: vec![
                ("POSTGRES_USER".to_string(), self.database.user.clone()),
                (
                    "POSTGRES_PASSWORD".to_string(),
                    self.database.password.expose_secret().to_string(),
                ),
                ("POSTGRES_DB".to_string(), self.database.dbname.clone()),
            ],
            startup_timeout: Duration::from_secs(self.service.startup_timeout_secs),
            stop_timeout: Duration::from_secs(self.service.stop_timeout_secs),
            auto_pull: self.service.auto_pull,
        }
    }

    pub fn port_waiter(&self) -> PortWaiter {
        PortWaiter::new(
            self.retries.port_max_attempts,
            Duration::from_millis(self.retries.port_retry_ms),
        )
        .with_dial_timeout(Duration::from_millis(self.retries.dial_timeout_ms))
    }

    pub fn health_checkr(&self) -> HealthWaiter {
        HealthWaiter::new(
            RetryPolicy::health_default()
                .with_delay(Duration::from_millis(self.retries.ping_retry_ms))
                .with_max_attempts(self.retries.ping_max_attempts),
        )
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::new(self.port_waiter(), self.health_checkr())
    }

    /// Connector for the database published by [`Self::service_spec`].
    pub fn connector(&self) -> PgConnector {
        let spec = self.service_spec();
        let host = match spec.address().rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.service.host.clone(),
        };
        PgConnector::new(host, self.service.host_port, &self.database)
    }
}
