//! The `check` command: is Docker reachable and what would `run` do.

use crate::config::Config;
use crate::container::connect_docker;

/// Print the resolved configuration and the Docker daemon version.
pub async fn run_check_command(config: Config) -> anyhow::Result<()> {
    let spec = config.service_spec();
    let connector = config.connector();

    println!("Configuration:");
    println!("  image            {}", spec.image);
    println!("  container name   {}", spec.label());
    println!("  address          {}", spec.address());
    println!("  database         {}", connector.display_url());
    println!("  startup timeout  {:?}", spec.startup_timeout);
    println!(
        "  port check       {} attempts, {} ms apart",
        config.retries.port_max_attempts, config.retries.port_retry_ms
    );
    match config.retries.ping_max_attempts {
        Some(max) => println!(
            "  health check     {} attempts, {} ms apart",
            max, config.retries.ping_retry_ms
        ),
        None => println!(
            "  health check     until startup timeout, {} ms apart",
            config.retries.ping_retry_ms
        ),
    }
    println!();

    let docker = connect_docker().await?;
    let version = docker.version().await?;
    println!(
        "Docker: {} (API {})",
        version.version.as_deref().unwrap_or("unknown"),
        version.api_version.as_deref().unwrap_or("unknown")
    );
    Ok(())
}
