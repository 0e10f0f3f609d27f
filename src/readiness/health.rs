//! Protocol-level readiness: ping the service until it answers.
//!
//! A freshly started database goes through three failure modes before it
//! accepts queries: connections reset by the peer, connections closed
//! mid-handshake, and explicit "starting up" refusals. All three are
//! retried; anything else aborts the wait on first sight.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::readiness::policy::{
    Classification, PingError, AttemptObserver, AttemptOutcome, AttemptReport, RetryPolicy,
};

/// Errors from the health check.
#[derive(Debug, Error)]
pub enum HealthError {
    /// A ping failed in a way retrying cannot fix.
    #[error("health check failed on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: PingError,
    },

    /// Transient failures used up the configured attempt cap.
    #[error("service still not healthy after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: PingError,
    },

    /// The caller cancelled while the check was waiting.
    #[error("health check cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl HealthError {
    pub fn attempts(&self) -> u32 {
        match self {
            HealthError::Fatal { attempts, .. }
            | HealthError::Exhausted { attempts, .. }
            | HealthError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Protocol client able to perform one health check.
///
/// A successful ping yields a session the workload can use, so the
/// connection that proved readiness is not thrown away.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Send + 'static;

    /// Perform a single health check.
    async fn ping(&self) -> Result<Self::Session, PingError>;
}

/// Outcome of a successful health wait.
#[derive(Debug)]
pub struct Healthy<S> {
    pub session: S,
    pub attempts: u32,
}

/// Repeats [`Connector::ping`] according to a [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct HealthWaiter {
    policy: RetryPolicy<PingError>,
    observer: Option<AttemptObserver>,
}

impl std::fmt::Debug for HealthWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthWaiter")
            .field("policy", &self.policy)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl HealthWaiter {
    pub fn new(policy: RetryPolicy<PingError>) -> Self {
        Self {
            policy,
            observer: None,
        }
    }

    /// Report every attempt to `observer` in addition to the debug log.
    pub fn with_observer(mut self, observer: AttemptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy<PingError> {
        &self.policy
    }

    fn report(&self, result: AttemptReport) {
        tracing::debug!(
            attempt = result.attempt,
            elapsed_ms = result.elapsed.as_millis() as u64,
            outcome = ?result.outcome,
            detail = result.detail.as_deref().unwrap_or(""),
            "Health check attempt"
        );
        if let Some(observer) = &self.observer {
            observer(&result);
        }
    }

    /// Ping until success, a fatal error, the attempt cap, or cancellation.
    pub async fn wait_healthy<C: Connector>(
        &self,
        connector: &C,
        cancel: &CancellationToken,
    ) -> Result<Healthy<C::Session>, HealthError> {
        self.wait_healthy_recording(connector, cancel, &Mutex::new(None))
            .await
    }

    /// Like [`wait_healthy`](Self::wait_healthy), also leaving each retried
    /// failure in `last_error` so a caller that abandons the wait can still
    /// report why the service was not healthy.
    pub async fn wait_healthy_recording<C: Connector>(
        &self,
        connector: &C,
        cancel: &CancellationToken,
        last_error: &Mutex<Option<PingError>>,
    ) -> Result<Healthy<C::Session>, HealthError> {
        tracing::info!("Pinging database");
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HealthError::Cancelled { attempts: attempt - 1 });
                }
                r = connector.ping() => r,
            };

            let err = match result {
                Ok(session) => {
                    self.report(AttemptReport {
                        outcome: AttemptOutcome::Success,
                        detail: None,
                        attempt,
                        elapsed: started.elapsed(),
                    });
                    tracing::info!("Database pinged after {} attempt(s)", attempt);
                    return Ok(Healthy {
                        session,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            let class = (self.policy.classify)(&err);
            self.report(AttemptReport {
                outcome: AttemptOutcome::from(class),
                detail: Some(format!("{} ({})", err, err.signature().as_str())),
                attempt,
                elapsed: started.elapsed(),
            });

            if class == Classification::Fatal {
                return Err(HealthError::Fatal {
                    attempts: attempt,
                    source: err,
                });
            }
            if self.policy.exhausted(attempt) {
                return Err(HealthError::Exhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HealthError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }
    }
}
