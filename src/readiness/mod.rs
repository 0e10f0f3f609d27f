//! Readiness detection for a freshly started service.
//!
//! Readiness is decided in two phases that must succeed in order:
//!
//! 1. **network**: the published port accepts TCP connections
//!    ([`PortWaiter`]);
//! 2. **protocol**: the service answers a health ping ([`HealthWaiter`]).
//!
//! The phases have separate failure domains and separate retry rules, so a
//! failure always reports which phase it came from.

pub mod health;
pub mod policy;
pub mod port;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use health::{Connector, HealthError, HealthWaiter, Healthy};
pub use policy::{
    Classification, FailureSignature, PingError, AttemptObserver, AttemptOutcome, AttemptReport,
    RetryPolicy, classify_ping_error,
};
pub use port::{PortCheck, PortError, PortWaiter};

/// Which readiness phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Network,
    Protocol,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Network => "network",
            Phase::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from [`Readiness::wait_ready`].
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The port never opened.
    #[error("service not ready (phase=network): {0}")]
    Network(#[source] PortError),

    /// The service never answered a health check.
    #[error("service not ready (phase=protocol): {0}")]
    Protocol(#[source] HealthError),

    /// The startup timeout elapsed. Carries the last failure seen in the
    /// interrupted phase, if any attempt had failed yet.
    #[error("service not ready within {timeout:?} (phase={phase})")]
    TimedOut {
        phase: Phase,
        timeout: Duration,
        #[source]
        last_failure: Option<LastFailure>,
    },
}

/// Most recent failure of a phase that was cut short by the startup timeout.
#[derive(Debug, Error)]
pub enum LastFailure {
    #[error("last dial error: {0}")]
    Dial(#[source] std::io::Error),

    #[error("last health check error: {0}")]
    Ping(#[source] PingError),
}

impl ReadinessError {
    pub fn phase(&self) -> Phase {
        match self {
            ReadinessError::Network(_) => Phase::Network,
            ReadinessError::Protocol(_) => Phase::Protocol,
            ReadinessError::TimedOut { phase, .. } => *phase,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReadinessError::Network(PortError::Cancelled { .. })
                | ReadinessError::Protocol(HealthError::Cancelled { .. })
        )
    }
}

/// A service that passed both phases.
#[derive(Debug)]
pub struct Ready<S> {
    /// Session opened by the successful health check.
    pub session: S,
    pub port_attempts: u32,
    pub ping_attempts: u32,
    pub elapsed: Duration,
}

/// Sequences the port check and the health check into one readiness gate.
#[derive(Debug, Clone, Default)]
pub struct Readiness<P = PortWaiter> {
    port: P,
    health: HealthWaiter,
}

impl<P: PortCheck> Readiness<P> {
    pub fn new(port: P, health: HealthWaiter) -> Self {
        Self { port, health }
    }

    /// Wait until `addr` is reachable and `connector` pings successfully.
    ///
    /// The health check never runs before the port check succeeded. The
    /// whole wait is bounded by `startup_timeout`.
    pub async fn wait_ready<C: Connector>(
        &self,
        addr: &str,
        connector: &C,
        startup_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ready<C::Session>, ReadinessError> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(startup_timeout);
        tokio::pin!(deadline);

        let last_dial = Mutex::new(None);
        let port_attempts = tokio::select! {
            r = self.port.await_port_recording(addr, cancel, &last_dial) => {
                r.map_err(ReadinessError::Network)?
            }
            _ = &mut deadline => {
                return Err(ReadinessError::TimedOut {
                    phase: Phase::Network,
                    timeout: startup_timeout,
                    last_failure: take_last(&last_dial).map(LastFailure::Dial),
                });
            }
        };

        let last_ping = Mutex::new(None);
        let healthy = tokio::select! {
            r = self.health.wait_healthy_recording(connector, cancel, &last_ping) => {
                r.map_err(ReadinessError::Protocol)?
            }
            _ = &mut deadline => {
                return Err(ReadinessError::TimedOut {
                    phase: Phase::Protocol,
                    timeout: startup_timeout,
                    last_failure: take_last(&last_ping).map(LastFailure::Ping),
                });
            }
        };

        let elapsed = started.elapsed();
        tracing::info!(
            port_attempts,
            ping_attempts = healthy.attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Service at {} is ready",
            addr
        );

        Ok(Ready {
            session: healthy.session,
            port_attempts,
            ping_attempts: healthy.attempts,
            elapsed,
        })
    }
}

fn take_last<E>(slot: &Mutex<Option<E>>) -> Option<E> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, ScriptedConnector, ScriptedPortCheck};

    fn fast_health() -> HealthWaiter {
        HealthWaiter::new(RetryPolicy::health_default().with_delay(Duration::from_millis(10)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_then_health() {
        let log = CallLog::default();
        let port = ScriptedPortCheck::succeeding(2).with_log(log.clone());
        let connector = ScriptedConnector::new(vec![Ok(())]).with_log(log.clone());

        let ready = Readiness::new(port, fast_health())
            .wait_ready(
                "127.0.0.1:5432",
                &connector,
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(ready.port_attempts, 2);
        assert_eq!(ready.ping_attempts, 1);
        assert_eq!(log.entries(), vec!["port", "ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_skips_health() {
        let log = CallLog::default();
        let port = ScriptedPortCheck::failing(10).with_log(log.clone());
        let connector = ScriptedConnector::new(vec![Ok(())]).with_log(log.clone());

        let err = Readiness::new(port, fast_health())
            .wait_ready(
                "127.0.0.1:5432",
                &connector,
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Network);
        assert_eq!(connector.calls(), 0);
        assert_eq!(log.entries(), vec!["port"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_failure_reports_phase() {
        let port = ScriptedPortCheck::succeeding(1);
        let connector = ScriptedConnector::new(vec![Err(FailureSignature::Other)]);

        let err = Readiness::new(port, fast_health())
            .wait_ready(
                "127.0.0.1:5432",
                &connector,
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Protocol);
        assert!(matches!(
            err,
            ReadinessError::Protocol(HealthError::Fatal { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout_bounds_unbounded_health_retry() {
        let port = ScriptedPortCheck::succeeding(1);
        let connector = ScriptedConnector::repeating(FailureSignature::StartingUp);

        let err = Readiness::new(port, fast_health())
            .wait_ready(
                "127.0.0.1:5432",
                &connector,
                Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReadinessError::TimedOut {
                phase: Phase::Protocol,
                ..
            }
        ));
        let cause = std::error::Error::source(&err).expect("timeout keeps the last ping error");
        assert!(cause.to_string().contains("starting up"), "{cause}");
        match err {
            ReadinessError::TimedOut {
                last_failure: Some(LastFailure::Ping(ping)),
                ..
            } => assert_eq!(ping.signature(), FailureSignature::StartingUp),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_reported() {
        let port = ScriptedPortCheck::succeeding(1);
        let connector = ScriptedConnector::repeating(FailureSignature::StartingUp);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Readiness::new(port, fast_health())
            .wait_ready("127.0.0.1:5432", &connector, Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
