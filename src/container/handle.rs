//! Handle to a provisioned container and its lifecycle state.

use std::sync::Arc;

use crate::container::error::{ContainerError, Result};
use crate::container::spec::ServiceSpec;

/// Lifecycle state of a managed container.
///
/// States only move forward: `Created → Started → Stopping → Removed`.
/// `Started` may be skipped when the container never came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    /// Created by the runtime, not running yet.
    Created,
    /// Running.
    Started,
    /// Teardown in progress.
    Stopping,
    /// Stopped and removed; terminal.
    Removed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Removed => "removed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container instance created from a [`ServiceSpec`].
///
/// Owned by whoever will tear it down; everything else borrows it.
#[derive(Debug)]
pub struct ContainerHandle {
    id: String,
    spec: Arc<ServiceSpec>,
    state: LifecycleState,
}

impl ContainerHandle {
    /// Wrap a runtime-assigned id. The handle starts in `Created`.
    pub fn new(id: impl Into<String>, spec: Arc<ServiceSpec>) -> Self {
        Self {
            id: id.into(),
            spec,
            state: LifecycleState::Created,
        }
    }

    /// Runtime-assigned container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Abbreviated id for log lines.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next`, rejecting any transition that is not strictly forward.
    pub fn advance(&mut self, next: LifecycleState) -> Result<()> {
        if next <= self.state {
            return Err(ContainerError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
