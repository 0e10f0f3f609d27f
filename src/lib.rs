//! Ephemeral PostgreSQL harness.
//!
//! Provisions a single database container on demand, waits until it is
//! actually usable, hands a live session to a workload and tears the
//! container down on every exit path.
//!
//! ```text
//! Orchestrator::run
//!     │
//!     ├─▶ ContainerLifecycle::create ─▶ start ─▶ spawn log forwarder
//!     │
//!     ├─▶ Readiness::wait_ready
//!     │       ├─▶ PortWaiter   (network phase, bounded attempts)
//!     │       └─▶ HealthWaiter (protocol phase, classified retry)
//!     │
//!     ├─▶ Workload::run(session)
//!     │
//!     └─▶ TeardownGuard::release ─▶ stop ─▶ remove   (always)
//! ```

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod orchestrator;
pub mod postgres;
pub mod readiness;
pub mod testing;
pub mod workload;
