//! Work executed once the service is ready.
//!
//! A workload receives the session that proved readiness and may open
//! further connections through it. Errors are arbitrary, so workloads
//! report them with `anyhow`.

mod demo;
mod ping;

use async_trait::async_trait;

pub use demo::{ConflictDemo, DemoSummary};
pub use ping::VersionCheck;

/// Caller-supplied work run against a ready service.
#[async_trait]
pub trait Workload<S: Send + 'static>: Send + Sync {
    type Output: Send;

    async fn run(&self, session: S) -> anyhow::Result<Self::Output>;
}

/// Built-in workloads selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WorkloadKind {
    /// Print the server version.
    #[default]
    Ping,
    /// Create a schema and run two conflicting transactions.
    Demo,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Ping => write!(f, "ping"),
            WorkloadKind::Demo => write!(f, "demo"),
        }
    }
}
