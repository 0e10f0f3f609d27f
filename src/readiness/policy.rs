//! Retry policy, failure classification and per-attempt check results.

use std::time::Duration;

use thiserror::Error;

/// Whether a failed attempt is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Expected while the service boots; retry after the policy delay.
    Transient,
    /// Will not resolve by waiting; stop immediately.
    Fatal,
}

/// The closed set of failure shapes a health ping is recognised by.
///
/// Anything not matched by a driver adapter lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignature {
    /// The listener accepted the socket before the protocol layer was up.
    ConnectionReset,
    /// The listener closed the socket in the middle of the handshake.
    EndOfStream,
    /// The server answered with its "starting up" status code.
    StartingUp,
    /// Unrecognised failure.
    Other,
}

impl FailureSignature {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureSignature::ConnectionReset => "connection reset",
            FailureSignature::EndOfStream => "end of stream",
            FailureSignature::StartingUp => "starting up",
            FailureSignature::Other => "other",
        }
    }
}

/// A failed protocol-level health check.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct PingError {
    signature: FailureSignature,
    detail: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PingError {
    pub fn new(signature: FailureSignature, detail: impl Into<String>) -> Self {
        Self {
            signature,
            detail: detail.into(),
            source: None,
        }
    }

    /// Attach the underlying driver error.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn signature(&self) -> FailureSignature {
        self.signature
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Default classification: reset, end-of-stream and "starting up" retry,
/// everything else is fatal.
pub fn classify_ping_error(err: &PingError) -> Classification {
    match err.signature() {
        FailureSignature::ConnectionReset
        | FailureSignature::EndOfStream
        | FailureSignature::StartingUp => Classification::Transient,
        FailureSignature::Other => Classification::Fatal,
    }
}

/// Classification used for dial errors: every one of them is retried.
pub fn always_transient<E>(_err: &E) -> Classification {
    Classification::Transient
}

/// How often and how long to retry a check.
pub struct RetryPolicy<E = PingError> {
    /// Maximum number of attempts. `None` retries transient failures forever.
    pub max_attempts: Option<u32>,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Maps a failure to transient or fatal.
    pub classify: fn(&E) -> Classification,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy<PingError> {
    /// Unbounded retries, 500ms apart, with [`classify_ping_error`].
    pub fn health_default() -> Self {
        Self {
            max_attempts: None,
            delay: Duration::from_millis(500),
            classify: classify_ping_error,
        }
    }
}

impl RetryPolicy<std::io::Error> {
    /// `max_attempts` dials, `delay` apart, every dial error retried.
    pub fn dial(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
            classify: always_transient,
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// True when `attempt` (1-based) used up the budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl Default for RetryPolicy<PingError> {
    fn default() -> Self {
        Self::health_default()
    }
}

/// Kind of a single check attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    FatalFailure,
}

impl From<Classification> for AttemptOutcome {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Transient => AttemptOutcome::TransientFailure,
            Classification::Fatal => AttemptOutcome::FatalFailure,
        }
    }
}

/// Result of one check attempt, reported to observers for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub outcome: AttemptOutcome,
    /// Error text for failed attempts.
    pub detail: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Time since the check began.
    pub elapsed: Duration,
}

/// Callback invoked after every attempt.
pub type AttemptObserver = std::sync::Arc<dyn Fn(&AttemptReport) + Send + Sync>;
