//! Scoped ownership of a container handle.

use std::sync::Arc;

use crate::container::{ContainerError, ContainerHandle, ContainerLifecycle, LifecycleState};

/// Owns a created container and guarantees a single teardown.
///
/// [`release`](Self::release) consumes the guard, so teardown cannot be
/// requested twice. If the guard is dropped without being released (the
/// owning future was cancelled or unwound), teardown is spawned on the
/// current runtime as a last resort.
pub struct TeardownGuard {
    lifecycle: Arc<dyn ContainerLifecycle>,
    handle: Option<ContainerHandle>,
}

impl TeardownGuard {
    pub fn new(lifecycle: Arc<dyn ContainerLifecycle>, handle: ContainerHandle) -> Self {
        Self {
            lifecycle,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> &ContainerHandle {
        match self.handle.as_ref() {
            Some(handle) => handle,
            None => unreachable!("handle is only taken by release or drop"),
        }
    }

    pub fn handle_mut(&mut self) -> &mut ContainerHandle {
        match self.handle.as_mut() {
            Some(handle) => handle,
            None => unreachable!("handle is only taken by release or drop"),
        }
    }

    /// Tear the container down. Returns the final lifecycle state along
    /// with the teardown result.
    ///
    /// Teardown runs on its own task: if the caller stops waiting (a
    /// timeout around the run, say), stop and remove still complete.
    pub async fn release(mut self) -> (LifecycleState, Result<(), ContainerError>) {
        let Some(mut handle) = self.handle.take() else {
            unreachable!("release consumes the guard");
        };
        let id = handle.id().to_string();
        let lifecycle = self.lifecycle.clone();
        let task = tokio::spawn(async move {
            let result = lifecycle.teardown(&mut handle).await;
            (handle.state(), result)
        });

        let (state, result) = match task.await {
            Ok(outcome) => outcome,
            Err(e) => (
                LifecycleState::Stopping,
                Err(ContainerError::RemoveFailed {
                    id: id.clone(),
                    reason: format!("teardown task failed: {e}"),
                }),
            ),
        };
        if let Err(e) = &result {
            tracing::error!("Teardown of container {} failed: {}", id, e);
        }
        (state, result)
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        tracing::warn!(
            "Container {} dropped without teardown, removing in background",
            handle.id()
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lifecycle = self.lifecycle.clone();
                runtime.spawn(async move {
                    if let Err(e) = lifecycle.teardown(&mut handle).await {
                        tracing::error!("Background teardown of {} failed: {}", handle.id(), e);
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    "No runtime available, container {} may remain running",
                    handle.id()
                );
            }
        }
    }
}
