//! pg-harness - Main entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pg_harness::{
    cli::{Cli, Command, run_check_command, run_command},
    config::Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pg_harness=info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    let config = Config::from_env()?;

    if let Some(Command::Check) = cli.command {
        return run_check_command(config).await;
    }
    let args = cli.run_args().unwrap_or_default();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, tearing down");
            on_signal.cancel();
        }
    });

    run_command(args, config, cancel).await
}
