//! CLI command handling.
//!
//! Provides subcommands for:
//! - Provisioning a database, running a workload and tearing down (`run`)
//! - Checking the container runtime and resolved configuration (`check`)

mod check;
mod run;

pub use check::run_check_command;
pub use run::{RunArgs, run_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pg-harness")]
#[command(about = "Run a workload against a throwaway PostgreSQL container")]
#[command(
    long_about = "Starts a PostgreSQL container, waits until it accepts queries, runs a workload and removes the container.\nExamples:\n  pg-harness run  # Print the server version\n  pg-harness run --workload demo  # Run the conflict demo"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "HARNESS_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision, run a workload, tear down (default if no subcommand given)
    #[command(
        about = "Run a workload against a fresh container",
        long_about = "Creates and starts the container, waits for readiness, runs the workload and always removes the container.\nExample: pg-harness run --workload demo"
    )]
    Run(RunArgs),

    /// Verify the container runtime is reachable
    #[command(
        about = "Check the container runtime",
        long_about = "Connects to the Docker daemon and prints the resolved configuration.\nExample: pg-harness check"
    )]
    Check,
}

impl Cli {
    /// Arguments for the `run` path, which is also the default.
    pub fn run_args(&self) -> Option<RunArgs> {
        match &self.command {
            None => Some(RunArgs::default()),
            Some(Command::Run(args)) => Some(args.clone()),
            Some(Command::Check) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadKind;
    use clap::CommandFactory;

    #[test]
    fn test_version() {
        let cmd = Cli::command();
        assert_eq!(
            cmd.get_version().unwrap_or("unknown"),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_runs_default_workload() {
        let cli = Cli::try_parse_from(["pg-harness"]).unwrap();
        let args = cli.run_args().unwrap();
        assert_eq!(args.workload, WorkloadKind::Ping);
        assert!(args.image.is_none());
        assert!(args.host_port.is_none());
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "pg-harness",
            "run",
            "--workload",
            "demo",
            "--image",
            "postgres:15",
            "--host-port",
            "55432",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        let args = cli.run_args().unwrap();
        assert_eq!(args.workload, WorkloadKind::Demo);
        assert_eq!(args.image.as_deref(), Some("postgres:15"));
        assert_eq!(args.host_port, Some(55432));
    }

    #[test]
    fn test_check_has_no_run_args() {
        let cli = Cli::try_parse_from(["pg-harness", "check"]).unwrap();
        assert!(cli.run_args().is_none());
    }

    #[test]
    fn test_rejects_unknown_workload() {
        assert!(Cli::try_parse_from(["pg-harness", "run", "--workload", "nope"]).is_err());
    }
}
