//! Error types for container lifecycle management.

use thiserror::Error;

use crate::container::handle::LifecycleState;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur while managing the service container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container runtime could not be reached.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image name.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container for '{image}': {reason}")]
    CreationFailed {
        /// Image the container was created from.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container {id}: {reason}")]
    StartFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to stop the container within its grace period.
    #[error("Failed to stop container {id}: {reason}")]
    StopFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to remove the container.
    #[error("Failed to remove container {id}: {reason}")]
    RemoveFailed {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The log stream broke before the container stopped.
    #[error("Log stream for container {id} failed: {reason}")]
    LogStream {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// A lifecycle transition that would move the handle backwards.
    #[error("Container {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Container id.
        id: String,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
}
