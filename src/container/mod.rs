//! Lifecycle management for the backing service's container.
//!
//! A container goes through `create → start → (logs) → stop → remove`.
//! The [`ContainerLifecycle`] trait is the seam between the orchestrator
//! and the runtime; [`DockerLifecycle`] implements it over bollard.
//!
//! # Example
//!
//! ```rust,no_run
//! use pg_harness::container::{ContainerLifecycle, DockerLifecycle, ServiceSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lifecycle = DockerLifecycle::connect().await?;
//! let spec = ServiceSpec {
//!     env: vec![("POSTGRES_PASSWORD".to_string(), "postgres".to_string())],
//!     ..Default::default()
//! };
//!
//! let mut handle = lifecycle.create(&spec).await?;
//! lifecycle.start(&mut handle).await?;
//! // ... use the database at spec.address() ...
//! lifecycle.teardown(&mut handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod docker;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod logs;
pub mod spec;

pub use docker::{DockerLifecycle, connect_docker};
pub use error::{ContainerError, Result};
pub use handle::{ContainerHandle, LifecycleState};
pub use lifecycle::ContainerLifecycle;
pub use logs::{LogLine, LogSource, LogStream, spawn_log_forwarder};
pub use spec::ServiceSpec;
