//! The `run` command: one full provision, workload and teardown cycle.

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::container::{DockerLifecycle, ServiceSpec};
use crate::orchestrator::{Orchestrator, RunError};
use crate::postgres::{PgConnector, PgSession};
use crate::workload::{ConflictDemo, VersionCheck, Workload, WorkloadKind};

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Workload to run once the database is ready
    #[arg(short, long, value_enum, default_value_t)]
    pub workload: WorkloadKind,

    /// Image to run (overrides HARNESS_IMAGE)
    #[arg(long)]
    pub image: Option<String>,

    /// Host port to publish (overrides HARNESS_HOST_PORT)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub host_port: Option<u16>,
}

impl RunArgs {
    /// Fold command-line overrides into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(image) = &self.image {
            config.service.image = image.clone();
        }
        if let Some(port) = self.host_port {
            config.service.host_port = port;
        }
    }
}

/// Run the selected workload against a fresh container.
///
/// Cancelling `cancel` stops the run at the next suspension point; the
/// container is still removed before this returns.
pub async fn run_command(
    args: RunArgs,
    mut config: Config,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    args.apply(&mut config);

    let lifecycle = DockerLifecycle::connect().await?;
    let orchestrator = Orchestrator::new(Arc::new(lifecycle), config.readiness())
        .with_log_forwarding(config.service.forward_logs);
    let spec = config.service_spec();
    let connector = config.connector();

    tracing::info!(
        "Running {} workload against {} ({})",
        args.workload,
        spec.label(),
        connector.display_url()
    );

    match args.workload {
        WorkloadKind::Ping => {
            let version = execute(&orchestrator, &spec, &connector, &VersionCheck, &cancel).await?;
            println!("{}", version);
        }
        WorkloadKind::Demo => {
            let summary = execute(
                &orchestrator,
                &spec,
                &connector,
                &ConflictDemo::default(),
                &cancel,
            )
            .await?;
            println!("Rows committed: {}", summary.committed_rows);
            if let Some(reason) = summary.aborted {
                println!("Aborted transaction: {}", reason);
            }
        }
    }

    Ok(())
}

async fn execute<W>(
    orchestrator: &Orchestrator,
    spec: &ServiceSpec,
    connector: &PgConnector,
    workload: &W,
    cancel: &CancellationToken,
) -> Result<W::Output, RunError>
where
    W: Workload<PgSession>,
{
    match orchestrator.run(spec, connector, workload, cancel).await {
        Ok(report) => {
            tracing::info!(
                container = %report.container_id,
                state = %report.final_state,
                port_attempts = report.readiness.port_attempts,
                ping_attempts = report.readiness.ping_attempts,
                "Ready after {:?}; container removed",
                report.readiness.elapsed
            );
            Ok(report.output)
        }
        Err(e) => {
            if let Some(teardown) = e.teardown_error() {
                tracing::error!("Container teardown failed: {}", teardown);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_to_config() {
        let mut config = Config::default();
        let args = RunArgs {
            workload: WorkloadKind::Ping,
            image: Some("postgres:15".to_string()),
            host_port: Some(55432),
        };
        args.apply(&mut config);
        assert_eq!(config.service.image, "postgres:15");
        assert_eq!(config.service.host_port, 55432);
        assert_eq!(config.service_spec().address(), "127.0.0.1:55432");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config::default();
        RunArgs::default().apply(&mut config);
        assert_eq!(config.service.image, "postgres:16-alpine");
        assert_eq!(config.service.host_port, 5432);
    }
}
