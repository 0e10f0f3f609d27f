//! Docker-backed lifecycle manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;

use crate::container::error::{ContainerError, Result};
use crate::container::handle::{ContainerHandle, LifecycleState};
use crate::container::lifecycle::ContainerLifecycle;
use crate::container::logs::{LogLine, LogSource, LogStream};
use crate::container::spec::ServiceSpec;

/// Connect to the local Docker daemon and verify it answers a ping.
///
/// Tries bollard's local defaults (which honour `DOCKER_HOST`) first, then
/// the rootless and Docker Desktop socket locations.
pub async fn connect_docker() -> Result<Docker> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => e.to_string(),
        },
        Err(e) => e.to_string(),
    };

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = format!("{}: {}", path, e),
            },
            Err(e) => last_error = format!("{}: {}", path, e),
        }
    }

    Err(ContainerError::DockerNotAvailable { reason: last_error })
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if cfg!(unix) {
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
        }
        if let Some(home) = dirs::home_dir() {
            sockets.push(home.join(".docker/run/docker.sock"));
        }
    }
    sockets
}

/// [`ContainerLifecycle`] over the Docker Engine API.
///
/// Holds one client for the whole process; the client is a plain API
/// connection, so no locking is needed around it.
#[derive(Clone)]
pub struct DockerLifecycle {
    docker: Docker,
}

impl DockerLifecycle {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect with [`connect_docker`] and wrap the client.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Pull the image unless it is already present locally.
    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let options = StopContainerOptions {
            t: handle.spec().stop_timeout.as_secs() as i64,
        };
        match self.docker.stop_container(handle.id(), Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::StopFailed {
                id: handle.id().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<()> {
        // `link: true` makes the daemon refuse with "cannot remove the default
        // name of the container".
        let options = RemoveContainerOptions {
            v: true,
            force,
            link: false,
        };
        self.docker
            .remove_container(handle.id(), Some(options))
            .await
            .map_err(|e| ContainerError::RemoveFailed {
                id: handle.id().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Build the create request for `spec`.
pub(crate) fn container_config(spec: &ServiceSpec) -> Config<String> {
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        spec.port_key(),
        Some(vec![PortBinding {
            host_ip: Some(spec.host_ip.clone()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    exposed_ports.insert(spec.port_key(), HashMap::new());

    let env = spec.env_entries();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        // Removal is explicit so teardown can report on it.
        auto_remove: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn log_line(output: LogOutput) -> LogLine {
    let (source, message) = match output {
        LogOutput::StdOut { message } => (LogSource::Stdout, message),
        LogOutput::StdErr { message } => (LogSource::Stderr, message),
        LogOutput::Console { message } | LogOutput::StdIn { message } => {
            (LogSource::Console, message)
        }
    };
    LogLine::new(source, String::from_utf8_lossy(&message).into_owned())
}

#[async_trait]
impl ContainerLifecycle for DockerLifecycle {
    async fn create(&self, spec: &ServiceSpec) -> Result<ContainerHandle> {
        if spec.auto_pull {
            self.pull_image(&spec.image).await?;
        }

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| ContainerError::CreationFailed {
                image: spec.image.clone(),
                reason: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!("Docker warning for {}: {}", response.id, warning);
        }

        let handle = ContainerHandle::new(response.id, Arc::new(spec.clone()));
        tracing::info!(container = handle.short_id(), "Container {} created", spec.label());
        Ok(handle)
    }

    async fn start(&self, handle: &mut ContainerHandle) -> Result<()> {
        self.docker
            .start_container(handle.id(), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::StartFailed {
                id: handle.id().to_string(),
                reason: e.to_string(),
            })?;
        handle.advance(LifecycleState::Started)?;
        tracing::info!("Container {} is started", handle.id());
        Ok(())
    }

    fn stream_logs(&self, handle: &ContainerHandle) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let id = handle.id().to_string();
        self.docker
            .logs(handle.id(), Some(options))
            .map(move |item| {
                item.map(log_line).map_err(|e| ContainerError::LogStream {
                    id: id.clone(),
                    reason: e.to_string(),
                })
            })
            .boxed()
    }

    async fn teardown(&self, handle: &mut ContainerHandle) -> Result<()> {
        let was_started = handle.state() == LifecycleState::Started;
        handle.advance(LifecycleState::Stopping)?;

        let mut stop_error = None;
        if was_started {
            tracing::info!("Container {} is stopping", handle.id());
            match self.stop(handle).await {
                Ok(()) => tracing::info!("Container {} is stopped", handle.id()),
                Err(e) => {
                    tracing::warn!("{}; forcing removal", e);
                    stop_error = Some(e);
                }
            }
        }

        let removed = self.remove(handle, stop_error.is_some()).await;
        if removed.is_ok() {
            handle.advance(LifecycleState::Removed)?;
            tracing::info!("Container {} is removed", handle.id());
        }

        teardown_outcome(stop_error, removed)
    }
}

/// Combine the stop and remove results so neither failure is dropped.
fn teardown_outcome(stop_error: Option<ContainerError>, removed: Result<()>) -> Result<()> {
    match (stop_error, removed) {
        (None, removed) => removed,
        (Some(stop), Ok(())) => Err(stop),
        (Some(stop), Err(ContainerError::RemoveFailed { id, reason })) => {
            Err(ContainerError::RemoveFailed {
                id,
                reason: format!("{} (after stop failed: {})", reason, stop),
            })
        }
        (Some(_), Err(other)) => Err(other),
    }
}
