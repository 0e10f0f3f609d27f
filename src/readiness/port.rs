//! Network-level readiness: wait until a TCP port accepts connections.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::readiness::policy::{Classification, AttemptOutcome, AttemptReport, RetryPolicy};

/// Errors from the port check.
#[derive(Debug, Error)]
pub enum PortError {
    /// Every dial attempt failed.
    #[error("cannot connect to {addr} after {attempts} attempts: {source}")]
    Timeout {
        addr: String,
        attempts: u32,
        /// Error from the last dial.
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled while the check was waiting.
    #[error("port check for {addr} cancelled after {attempts} attempts")]
    Cancelled { addr: String, attempts: u32 },
}

/// Something that can wait for a TCP port to open.
#[async_trait]
pub trait PortCheck: Send + Sync {
    /// Wait until `addr` accepts a connection. Returns the number of dials made.
    async fn await_port(&self, addr: &str, cancel: &CancellationToken) -> Result<u32, PortError>;

    /// Like [`await_port`](Self::await_port), also leaving the most recent
    /// dial error in `last_error` so a caller that abandons the wait can
    /// still report it.
    async fn await_port_recording(
        &self,
        addr: &str,
        cancel: &CancellationToken,
        last_error: &Mutex<Option<std::io::Error>>,
    ) -> Result<u32, PortError> {
        let _ = last_error;
        self.await_port(addr, cancel).await
    }
}

/// Dials `addr` with a fixed delay between attempts.
///
/// No backoff: the window in which a booting container refuses connections
/// is short and bounded.
#[derive(Debug, Clone)]
pub struct PortWaiter {
    policy: RetryPolicy<std::io::Error>,
    dial_timeout: Duration,
}

impl Default for PortWaiter {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(100))
    }
}

impl PortWaiter {
    /// At most `max_attempts` dials, `delay` apart, each bounded by one second.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            policy: RetryPolicy::dial(max_attempts, delay),
            dial_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy<std::io::Error>) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy<std::io::Error> {
        &self.policy
    }

    async fn dial(&self, addr: &str) -> std::io::Result<()> {
        match tokio::time::timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            // Reachability only; the stream is closed right away.
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("dial timed out after {:?}", self.dial_timeout),
            )),
        }
    }
}

#[async_trait]
impl PortCheck for PortWaiter {
    async fn await_port(&self, addr: &str, cancel: &CancellationToken) -> Result<u32, PortError> {
        self.await_port_recording(addr, cancel, &Mutex::new(None))
            .await
    }

    async fn await_port_recording(
        &self,
        addr: &str,
        cancel: &CancellationToken,
        last_error: &Mutex<Option<std::io::Error>>,
    ) -> Result<u32, PortError> {
        tracing::info!("Checking for open port on {}", addr);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PortError::Cancelled { addr: addr.to_string(), attempts: attempt - 1 });
                }
                r = self.dial(addr) => r,
            };

            let err = match result {
                Ok(()) => {
                    tracing::info!("Port {} connected after {} attempt(s)", addr, attempt);
                    return Ok(attempt);
                }
                Err(e) => e,
            };

            let class = (self.policy.classify)(&err);
            let report = AttemptReport {
                outcome: AttemptOutcome::from(class),
                detail: Some(err.to_string()),
                attempt,
                elapsed: started.elapsed(),
            };
            tracing::debug!(
                attempt = report.attempt,
                elapsed_ms = report.elapsed.as_millis() as u64,
                outcome = ?report.outcome,
                "Port {} not reachable: {}",
                addr,
                err
            );

            if class == Classification::Fatal || self.policy.exhausted(attempt) {
                return Err(PortError::Timeout {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            *last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PortError::Cancelled { addr: addr.to_string(), attempts: attempt });
                }
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// An address nothing listens on: bind, read the port, release it.
    async fn closed_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_succeeds_on_first_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let waiter = PortWaiter::new(3, Duration::from_millis(10));
        let attempts = waiter
            .await_port(&addr, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let addr = closed_addr().await;
        let waiter = PortWaiter::new(4, Duration::from_millis(10));

        let started = Instant::now();
        let err = waiter
            .await_port(&addr, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PortError::Timeout {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Three sleeps between four dials.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_succeeds_once_port_opens() {
        let addr = closed_addr().await;
        let bind_addr = addr.clone();
        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = TcpListener::bind(bind_addr).await.unwrap();
            // Keep the listener alive long enough for the check to connect.
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(listener);
        });

        let waiter = PortWaiter::new(100, Duration::from_millis(20));
        let attempts = waiter
            .await_port(&addr, &CancellationToken::new())
            .await
            .unwrap();
        assert!(attempts > 1 && attempts <= 100);
        opener.abort();
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let addr = closed_addr().await;
        let waiter = PortWaiter::new(u32::MAX, Duration::from_secs(3600));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), waiter.await_port(&addr, &cancel))
            .await
            .expect("cancellation must interrupt the retry sleep")
            .unwrap_err();
        assert!(matches!(err, PortError::Cancelled { attempts: 1, .. }));
    }
}
