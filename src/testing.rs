//! Test doubles for the lifecycle, readiness and workload seams.
//!
//! Provides:
//! - [`FakeLifecycle`]: in-memory container runtime with call counters and
//!   injectable failures
//! - [`ScriptedConnector`]: health pings that follow a fixed script
//! - [`ScriptedPortCheck`]: a port check with a fixed outcome
//! - [`CallLog`]: shared call-order recorder
//! - [`FnWorkload`]: wrap a closure as a workload
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_harness::testing::{FakeLifecycle, FnWorkload, ScriptedConnector, ScriptedPortCheck};
//!
//! # async fn example() {
//! let fake = Arc::new(FakeLifecycle::new());
//! let connector = ScriptedConnector::new(vec![Ok(())]);
//! let workload = FnWorkload::new(|_: ()| Ok(()));
//! // build an Orchestrator around `fake` and run it ...
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::container::{
    ContainerError, ContainerHandle, ContainerLifecycle, LifecycleState, LogLine, LogStream,
    ServiceSpec,
};
use crate::readiness::{Connector, FailureSignature, PingError, PortCheck, PortError};
use crate::workload::Workload;

/// Records the order in which fakes were called.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn record(&self, entry: &'static str) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// In-memory [`ContainerLifecycle`].
///
/// Counts every call and enforces the same state transitions as the real
/// implementation through [`ContainerHandle::advance`].
#[derive(Default)]
pub struct FakeLifecycle {
    creates: AtomicU32,
    starts: AtomicU32,
    teardowns: AtomicU32,
    fail_create: bool,
    fail_start: bool,
    fail_teardown: bool,
    log_lines: Vec<LogLine>,
    teardown_delay: Option<Duration>,
    final_states: Mutex<Vec<LifecycleState>>,
}

impl FakeLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Removal fails; the handle is left in `Stopping`.
    pub fn fail_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }

    /// Sleep between stop and remove, like a container using its whole
    /// stop grace period.
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = Some(delay);
        self
    }

    /// Lines returned by every [`ContainerLifecycle::stream_logs`] call.
    pub fn with_log_lines(mut self, lines: Vec<LogLine>) -> Self {
        self.log_lines = lines;
        self
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> u32 {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// State of each handle when its teardown returned.
    pub fn final_states(&self) -> Vec<LifecycleState> {
        self.final_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ContainerLifecycle for FakeLifecycle {
    async fn create(&self, spec: &ServiceSpec) -> Result<ContainerHandle, ContainerError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(ContainerError::CreationFailed {
                image: spec.image.clone(),
                reason: "fake create failure".to_string(),
            });
        }
        Ok(ContainerHandle::new(
            format!("fake{:016x}", n),
            Arc::new(spec.clone()),
        ))
    }

    async fn start(&self, handle: &mut ContainerHandle) -> Result<(), ContainerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ContainerError::StartFailed {
                id: handle.id().to_string(),
                reason: "fake start failure".to_string(),
            });
        }
        handle.advance(LifecycleState::Started)
    }

    fn stream_logs(&self, _handle: &ContainerHandle) -> LogStream {
        futures::stream::iter(self.log_lines.clone().into_iter().map(Ok)).boxed()
    }

    async fn teardown(&self, handle: &mut ContainerHandle) -> Result<(), ContainerError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        handle.advance(LifecycleState::Stopping)?;
        if let Some(delay) = self.teardown_delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.fail_teardown {
            Err(ContainerError::RemoveFailed {
                id: handle.id().to_string(),
                reason: "fake remove failure".to_string(),
            })
        } else {
            handle.advance(LifecycleState::Removed)
        };
        self.final_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.state());
        result
    }
}

/// A [`Connector`] whose pings follow a script.
///
/// Each call consumes one entry: `Ok(())` succeeds, `Err(signature)` fails
/// with that signature. Once the script is exhausted the connector either
/// succeeds or, when built with [`repeating`](Self::repeating), keeps
/// failing.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Result<(), FailureSignature>>>,
    repeat: Option<FailureSignature>,
    calls: Mutex<Vec<Instant>>,
    log: Option<CallLog>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Result<(), FailureSignature>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Fail with `signature` on every call.
    pub fn repeating(signature: FailureSignature) -> Self {
        Self {
            repeat: Some(signature),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// When each ping happened, on the tokio clock.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ();

    async fn ping(&self) -> Result<(), PingError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());
        if let Some(log) = &self.log {
            log.record("ping");
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let step = match next {
            Some(step) => step,
            None => match self.repeat {
                Some(signature) => Err(signature),
                None => Ok(()),
            },
        };
        step.map_err(|signature| PingError::new(signature, signature.as_str()))
    }
}

/// A [`PortCheck`] that succeeds or times out after a fixed attempt count.
#[derive(Debug, Clone)]
pub struct ScriptedPortCheck {
    attempts: u32,
    succeed: bool,
    log: Option<CallLog>,
}

impl ScriptedPortCheck {
    pub fn succeeding(attempts: u32) -> Self {
        Self {
            attempts,
            succeed: true,
            log: None,
        }
    }

    pub fn failing(attempts: u32) -> Self {
        Self {
            attempts,
            succeed: false,
            log: None,
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }
}

#[async_trait]
impl PortCheck for ScriptedPortCheck {
    async fn await_port(&self, addr: &str, cancel: &CancellationToken) -> Result<u32, PortError> {
        if let Some(log) = &self.log {
            log.record("port");
        }
        if cancel.is_cancelled() {
            return Err(PortError::Cancelled {
                addr: addr.to_string(),
                attempts: 0,
            });
        }
        if self.succeed {
            Ok(self.attempts)
        } else {
            Err(PortError::Timeout {
                addr: addr.to_string(),
                attempts: self.attempts,
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            })
        }
    }
}

/// Adapts a closure into a [`Workload`].
pub struct FnWorkload<F>(F);

impl<F> FnWorkload<F> {
    pub fn new<S, T>(f: F) -> Self
    where
        F: Fn(S) -> anyhow::Result<T>,
    {
        Self(f)
    }
}

#[async_trait]
impl<S, F, T> Workload<S> for FnWorkload<F>
where
    S: Send + 'static,
    F: Fn(S) -> anyhow::Result<T> + Send + Sync,
    T: Send,
{
    type Output = T;

    async fn run(&self, session: S) -> anyhow::Result<T> {
        (self.0)(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_lifecycle_enforces_transitions() {
        let fake = FakeLifecycle::new();
        let mut handle =
            tokio_test::block_on(fake.create(&ServiceSpec::default())).unwrap();
        assert_eq!(handle.state(), LifecycleState::Created);

        tokio_test::block_on(fake.start(&mut handle)).unwrap();
        assert!(tokio_test::block_on(fake.start(&mut handle)).is_err());

        tokio_test::block_on(fake.teardown(&mut handle)).unwrap();
        assert!(tokio_test::block_on(fake.teardown(&mut handle)).is_err());
        assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
        assert_eq!(fake.starts(), 2);
    }

    #[test]
    fn test_scripted_connector_falls_back_to_success() {
        let connector = ScriptedConnector::new(vec![Err(FailureSignature::EndOfStream)]);
        let first = tokio_test::block_on(connector.ping()).unwrap_err();
        assert_eq!(first.signature(), FailureSignature::EndOfStream);
        assert!(tokio_test::block_on(connector.ping()).is_ok());
        assert_eq!(connector.calls(), 2);
    }
}
