//! The container lifecycle contract.

use async_trait::async_trait;

use crate::container::error::Result;
use crate::container::handle::ContainerHandle;
use crate::container::logs::LogStream;
use crate::container::spec::ServiceSpec;

/// Creates, starts, observes and removes the service container.
///
/// Implementations are stateless with respect to individual containers:
/// all per-container state lives in the [`ContainerHandle`], which the
/// caller owns. Teardown must be invoked exactly once per handle, which
/// [`crate::orchestrator::TeardownGuard`] takes care of.
#[async_trait]
pub trait ContainerLifecycle: Send + Sync {
    /// Request a container for `spec` without starting it.
    async fn create(&self, spec: &ServiceSpec) -> Result<ContainerHandle>;

    /// Start a created container (`Created → Started`).
    async fn start(&self, handle: &mut ContainerHandle) -> Result<()>;

    /// Follow the container's stdout/stderr.
    ///
    /// The stream ends when the container stops. Calling again opens a
    /// fresh stream.
    fn stream_logs(&self, handle: &ContainerHandle) -> LogStream;

    /// Stop (bounded by `ServiceSpec::stop_timeout`) and remove the container
    /// with its volumes (`→ Stopping → Removed`).
    async fn teardown(&self, handle: &mut ContainerHandle) -> Result<()>;
}
