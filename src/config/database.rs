use secrecy::SecretString;

use crate::config::helpers::optional_env;
use crate::error::ConfigError;

/// Credentials the database container is initialised with.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: SecretString,
    pub dbname: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: SecretString::from("postgres"),
            dbname: "postgres".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            user: optional_env("POSTGRES_USER")?.unwrap_or(defaults.user),
            password: optional_env("POSTGRES_PASSWORD")?
                .map(SecretString::from)
                .unwrap_or(defaults.password),
            dbname: optional_env("POSTGRES_DB")?.unwrap_or(defaults.dbname),
        })
    }
}
