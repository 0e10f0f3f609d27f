//! Background forwarding of container output into `tracing`.

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::container::error::ContainerError;

/// Which output stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
    Console,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
            LogSource::Console => "console",
        }
    }
}

/// One chunk of container output, usually a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Lazily evaluated log sequence produced by a lifecycle manager.
pub type LogStream = BoxStream<'static, Result<LogLine, ContainerError>>;

/// Spawn a task that drains `stream` into tracing events until the stream
/// ends or `cancel` fires.
///
/// The task is never joined by the orchestrator. Stream errors are logged
/// and end the task; they never reach the caller.
pub fn spawn_log_forwarder(
    container: String,
    mut stream: LogStream,
    cancel: CancellationToken,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut forwarded = 0usize;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(line)) => {
                        forwarded += 1;
                        tracing::info!(
                            target: "pg_harness::container_log",
                            container = %container,
                            stream = line.source.as_str(),
                            "{}",
                            line.text.trim_end()
                        );
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Log forwarding for {} stopped: {}", container, e);
                        break;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Log forwarder for {} exited after {} lines", container, forwarded);
        forwarded
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwarder_drains_until_end() {
        let lines = vec![
            Ok(LogLine::new(LogSource::Stdout, "database system is ready\n")),
            Ok(LogLine::new(LogSource::Stderr, "LOG: listening\n")),
        ];
        let stream: LogStream = futures::stream::iter(lines).boxed();
        let handle = spawn_log_forwarder("abc".to_string(), stream, CancellationToken::new());
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_forwarder_stops_on_error() {
        let lines = vec![
            Ok(LogLine::new(LogSource::Stdout, "one")),
            Err(ContainerError::LogStream {
                id: "abc".to_string(),
                reason: "broken pipe".to_string(),
            }),
            Ok(LogLine::new(LogSource::Stdout, "never forwarded")),
        ];
        let stream: LogStream = futures::stream::iter(lines).boxed();
        let handle = spawn_log_forwarder("abc".to_string(), stream, CancellationToken::new());
        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forwarder_stops_on_cancel() {
        let stream: LogStream = futures::stream::pending().boxed();
        let cancel = CancellationToken::new();
        let handle = spawn_log_forwarder("abc".to_string(), stream, cancel.clone());
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 0);
    }
}
