//! Top-level driver for one provision → ready → workload → teardown run.

mod guard;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use guard::TeardownGuard;

use crate::container::{
    ContainerError, ContainerLifecycle, LifecycleState, ServiceSpec, spawn_log_forwarder,
};
use crate::readiness::{Connector, Phase, PortCheck, PortWaiter, Readiness, ReadinessError};
use crate::workload::Workload;

/// Errors from [`Orchestrator::run`].
///
/// The variant is always the first failure of the run. A teardown failure
/// that happened afterwards is kept alongside it, never in its place.
#[derive(Debug, Error)]
pub enum RunError {
    /// No container was created; nothing to tear down.
    #[error("container creation failed: {0}")]
    Create(#[source] ContainerError),

    #[error("container start failed: {source}")]
    Start {
        source: ContainerError,
        teardown: Option<ContainerError>,
    },

    #[error("{source}")]
    Readiness {
        source: ReadinessError,
        teardown: Option<ContainerError>,
    },

    #[error("workload failed: {error:#}")]
    Workload {
        error: anyhow::Error,
        teardown: Option<ContainerError>,
    },

    #[error("run cancelled")]
    Cancelled { teardown: Option<ContainerError> },

    /// Everything else succeeded but the container could not be removed.
    #[error("teardown failed: {0}")]
    Teardown(#[source] ContainerError),
}

impl RunError {
    /// The teardown failure that followed the primary error, if any.
    pub fn teardown_error(&self) -> Option<&ContainerError> {
        match self {
            RunError::Start { teardown, .. }
            | RunError::Readiness { teardown, .. }
            | RunError::Workload { teardown, .. }
            | RunError::Cancelled { teardown } => teardown.as_ref(),
            RunError::Teardown(e) => Some(e),
            RunError::Create(_) => None,
        }
    }

    /// Readiness phase that failed, for readiness errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            RunError::Readiness { source, .. } => Some(source.phase()),
            _ => None,
        }
    }

    fn with_teardown(mut self, error: ContainerError) -> Self {
        match &mut self {
            RunError::Start { teardown, .. }
            | RunError::Readiness { teardown, .. }
            | RunError::Workload { teardown, .. }
            | RunError::Cancelled { teardown } => *teardown = Some(error),
            RunError::Create(_) | RunError::Teardown(_) => {}
        }
        self
    }
}

/// Readiness figures for a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessStats {
    pub port_attempts: u32,
    pub ping_attempts: u32,
    pub elapsed: Duration,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct RunReport<T> {
    pub output: T,
    pub container_id: String,
    pub final_state: LifecycleState,
    pub readiness: ReadinessStats,
}

/// Drives a single run against one lifecycle manager.
pub struct Orchestrator<P = PortWaiter> {
    lifecycle: Arc<dyn ContainerLifecycle>,
    readiness: Readiness<P>,
    forward_logs: bool,
}

impl<P: PortCheck> Orchestrator<P> {
    pub fn new(lifecycle: Arc<dyn ContainerLifecycle>, readiness: Readiness<P>) -> Self {
        Self {
            lifecycle,
            readiness,
            forward_logs: true,
        }
    }

    /// Enable or disable background log forwarding.
    pub fn with_log_forwarding(mut self, enabled: bool) -> Self {
        self.forward_logs = enabled;
        self
    }

    /// Provision `spec`, wait until `connector` can use it, run `workload`
    /// on the resulting session and tear the container down.
    ///
    /// Once a container exists it is removed on every exit path: errors,
    /// cancellation through `cancel`, and panics inside the workload (which
    /// are resumed after teardown).
    pub async fn run<C, W>(
        &self,
        spec: &ServiceSpec,
        connector: &C,
        workload: &W,
        cancel: &CancellationToken,
    ) -> Result<RunReport<W::Output>, RunError>
    where
        C: Connector,
        W: Workload<C::Session>,
    {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, image = %spec.image);
        self.run_inner(spec, connector, workload, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner<C, W>(
        &self,
        spec: &ServiceSpec,
        connector: &C,
        workload: &W,
        cancel: &CancellationToken,
    ) -> Result<RunReport<W::Output>, RunError>
    where
        C: Connector,
        W: Workload<C::Session>,
    {
        let handle = self.lifecycle.create(spec).await.map_err(RunError::Create)?;
        let mut guard = TeardownGuard::new(self.lifecycle.clone(), handle);
        let container_id = guard.handle().id().to_string();
        let logs_cancel = cancel.child_token();

        let outcome = AssertUnwindSafe(self.drive(
            &mut guard,
            spec,
            connector,
            workload,
            cancel,
            &logs_cancel,
        ))
        .catch_unwind()
        .await;

        let (final_state, teardown) = guard.release().await;
        logs_cancel.cancel();

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!("Workload panicked; container {} torn down", container_id);
                std::panic::resume_unwind(panic);
            }
        };

        match (result, teardown) {
            (Ok((output, readiness)), Ok(())) => Ok(RunReport {
                output,
                container_id,
                final_state,
                readiness,
            }),
            (Ok(_), Err(e)) => Err(RunError::Teardown(e)),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(e)) => Err(primary.with_teardown(e)),
        }
    }

    /// Everything between create and teardown.
    async fn drive<C, W>(
        &self,
        guard: &mut TeardownGuard,
        spec: &ServiceSpec,
        connector: &C,
        workload: &W,
        cancel: &CancellationToken,
        logs_cancel: &CancellationToken,
    ) -> Result<(W::Output, ReadinessStats), RunError>
    where
        C: Connector,
        W: Workload<C::Session>,
    {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled { teardown: None });
        }

        self.lifecycle
            .start(guard.handle_mut())
            .await
            .map_err(|source| RunError::Start {
                source,
                teardown: None,
            })?;

        if self.forward_logs {
            let stream = self.lifecycle.stream_logs(guard.handle());
            // Detached: the forwarder ends with the container or on cancel.
            let _ = spawn_log_forwarder(
                guard.handle().short_id().to_string(),
                stream,
                logs_cancel.clone(),
            );
        }

        let ready = self
            .readiness
            .wait_ready(&spec.address(), connector, spec.startup_timeout, cancel)
            .await
            .map_err(|source| {
                if source.is_cancelled() {
                    RunError::Cancelled { teardown: None }
                } else {
                    RunError::Readiness {
                        source,
                        teardown: None,
                    }
                }
            })?;

        let stats = ReadinessStats {
            port_attempts: ready.port_attempts,
            ping_attempts: ready.ping_attempts,
            elapsed: ready.elapsed,
        };

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled { teardown: None }),
            r = workload.run(ready.session) => r,
        };

        output
            .map(|o| (o, stats))
            .map_err(|error| RunError::Workload {
                error,
                teardown: None,
            })
    }
}
