//! Description of the backing service to provision.

use std::time::Duration;

/// Immutable description of the container to run.
///
/// Built once per run (usually from [`crate::config::Config`]) and shared by
/// reference afterwards.
#[derive(Clone)]
pub struct ServiceSpec {
    /// Image reference, e.g. `postgres:16-alpine`.
    pub image: String,
    /// Explicit container name. `None` lets the runtime pick one.
    pub name: Option<String>,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Host interface the port is published on.
    pub host_ip: String,
    /// Host port bound to `container_port`.
    pub host_port: u16,
    /// Environment variables: (name, value). May contain credentials.
    pub env: Vec<(String, String)>,
    /// Upper bound for the whole readiness wait.
    pub startup_timeout: Duration,
    /// Grace period given to the container on stop before it is killed.
    pub stop_timeout: Duration,
    /// Pull the image when it is not present locally.
    pub auto_pull: bool,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            image: "postgres:16-alpine".to_string(),
            name: None,
            container_port: 5432,
            host_ip: "127.0.0.1".to_string(),
            host_port: 5432,
            env: Vec::new(),
            startup_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(10),
            auto_pull: true,
        }
    }
}

impl ServiceSpec {
    /// `host:port` the service is reachable on from this machine.
    pub fn address(&self) -> String {
        let host = if self.host_ip == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host_ip.as_str()
        };
        format!("{}:{}", host, self.host_port)
    }

    /// Container port key in the form the runtime expects (`5432/tcp`).
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }

    /// Environment rendered as `KEY=value` entries.
    pub fn env_entries(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Human-readable label for log lines.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.image)
    }
}

impl std::fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ServiceSpec")
            .field("image", &self.image)
            .field("name", &self.name)
            .field("container_port", &self.container_port)
            .field("host_ip", &self.host_ip)
            .field("host_port", &self.host_port)
            .field("env", &env_keys)
            .field("startup_timeout", &self.startup_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .field("auto_pull", &self.auto_pull)
            .finish()
    }
}
