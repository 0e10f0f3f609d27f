//! Run orchestration against an in-memory container runtime.
//!
//! Every test checks the same guarantee from a different exit path: a
//! container that was created is torn down exactly once, and the error the
//! caller sees is the first thing that went wrong.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use pg_harness::container::{LifecycleState, LogLine, LogSource, ServiceSpec};
use pg_harness::orchestrator::{Orchestrator, RunError};
use pg_harness::readiness::{
    FailureSignature, HealthError, HealthWaiter, Phase, PortError, Readiness, ReadinessError,
    RetryPolicy,
};
use pg_harness::testing::{
    CallLog, FakeLifecycle, FnWorkload, ScriptedConnector, ScriptedPortCheck,
};
use pg_harness::workload::Workload;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn orchestrator(
    fake: &Arc<FakeLifecycle>,
    port: ScriptedPortCheck,
    health: RetryPolicy,
) -> Orchestrator<ScriptedPortCheck> {
    Orchestrator::new(fake.clone(), Readiness::new(port, HealthWaiter::new(health)))
}

fn fast_health() -> RetryPolicy {
    RetryPolicy::health_default().with_delay(Duration::from_millis(10))
}

fn spec_with_timeout(timeout: Duration) -> ServiceSpec {
    ServiceSpec {
        startup_timeout: timeout,
        ..ServiceSpec::default()
    }
}

/// Signals when it starts, then never finishes.
struct HangingWorkload {
    started: Arc<Notify>,
}

#[async_trait]
impl Workload<()> for HangingWorkload {
    type Output = ();

    async fn run(&self, _session: ()) -> anyhow::Result<()> {
        self.started.notify_one();
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Success
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn happy_path_runs_workload_on_ready_session_and_removes_container() {
    let fake = Arc::new(FakeLifecycle::new().with_log_lines(vec![LogLine {
        source: LogSource::Stdout,
        text: "database system is ready to accept connections".to_string(),
    }]));
    let log = CallLog::default();
    let orch = orchestrator(
        &fake,
        ScriptedPortCheck::succeeding(3).with_log(log.clone()),
        fast_health(),
    );
    let connector = ScriptedConnector::new(vec![
        Err(FailureSignature::ConnectionReset),
        Err(FailureSignature::StartingUp),
        Ok(()),
    ])
    .with_log(log.clone());
    let workload = FnWorkload::new(|_: ()| Ok("done"));

    let report = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.output, "done");
    assert_eq!(report.final_state, LifecycleState::Removed);
    assert_eq!(report.readiness.port_attempts, 3);
    assert_eq!(report.readiness.ping_attempts, 3);
    assert!(report.container_id.starts_with("fake"));
    assert_eq!(log.entries(), vec!["port", "ping", "ping", "ping"]);
    assert_eq!(fake.creates(), 1);
    assert_eq!(fake.starts(), 1);
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

// ---------------------------------------------------------------------------
// Readiness failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn port_never_opens_fails_network_phase_without_pinging() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::failing(10), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload = FnWorkload::new(|_: ()| Ok(()));

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Network));
    assert!(matches!(
        err,
        RunError::Readiness {
            source: ReadinessError::Network(PortError::Timeout { attempts: 10, .. }),
            teardown: None,
        }
    ));
    assert_eq!(connector.calls(), 0);
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

#[tokio::test(start_paused = true)]
async fn fatal_ping_fails_protocol_phase_after_one_attempt() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::repeating(FailureSignature::Other);
    let workload = FnWorkload::new(|_: ()| -> anyhow::Result<()> {
        panic!("workload must not run when readiness fails")
    });

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Protocol));
    assert!(matches!(
        err,
        RunError::Readiness {
            source: ReadinessError::Protocol(HealthError::Fatal { attempts: 1, .. }),
            ..
        }
    ));
    assert_eq!(connector.calls(), 1);
    assert_eq!(fake.teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn capped_health_check_reports_exhaustion() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(
        &fake,
        ScriptedPortCheck::succeeding(1),
        fast_health().with_max_attempts(Some(4)),
    );
    let connector = ScriptedConnector::repeating(FailureSignature::StartingUp);
    let workload = FnWorkload::new(|_: ()| Ok(()));

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Readiness {
            source: ReadinessError::Protocol(HealthError::Exhausted { .. }),
            ..
        }
    ));
    assert_eq!(connector.calls(), 4);
    assert_eq!(fake.teardowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn startup_timeout_bounds_an_uncapped_health_check() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::repeating(FailureSignature::StartingUp);
    let workload = FnWorkload::new(|_: ()| Ok(()));

    let err = orch
        .run(
            &spec_with_timeout(Duration::from_secs(2)),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Readiness {
            source: ReadinessError::TimedOut {
                phase: Phase::Protocol,
                ..
            },
            ..
        }
    ));
    assert!(connector.calls() > 100);
    assert_eq!(fake.teardowns(), 1);
}

// ---------------------------------------------------------------------------
// Workload failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn workload_error_is_reported_after_teardown() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload =
        FnWorkload::new(|_: ()| -> anyhow::Result<()> { anyhow::bail!("relation does not exist") });

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("relation does not exist"));
    assert!(err.teardown_error().is_none());
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

#[tokio::test(start_paused = true)]
async fn workload_panic_is_resumed_after_teardown() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload =
        FnWorkload::new(|_: ()| -> anyhow::Result<()> { panic!("workload exploded") });
    let cancel = CancellationToken::new();

    let outcome = AssertUnwindSafe(orch.run(&ServiceSpec::default(), &connector, &workload, &cancel))
        .catch_unwind()
        .await;

    let panic = outcome.unwrap_err();
    assert_eq!(panic.downcast_ref::<&str>(), Some(&"workload exploded"));
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_during_health_check_tears_down() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(
        &fake,
        ScriptedPortCheck::succeeding(1),
        RetryPolicy::health_default(),
    );
    let connector = ScriptedConnector::repeating(FailureSignature::StartingUp);
    let workload = FnWorkload::new(|_: ()| Ok(()));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        trigger.cancel();
    });

    let err = orch
        .run(&ServiceSpec::default(), &connector, &workload, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Cancelled { teardown: None }));
    assert_eq!(connector.calls(), 3);
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_workload_tears_down() {
    let fake = Arc::new(FakeLifecycle::new());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let started = Arc::new(Notify::new());
    let workload = HangingWorkload {
        started: started.clone(),
    };
    let cancel = CancellationToken::new();
    let spec = ServiceSpec::default();

    let (result, ()) = tokio::join!(
        orch.run(&spec, &connector, &workload, &cancel),
        async {
            started.notified().await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(RunError::Cancelled { .. })));
    assert_eq!(fake.teardowns(), 1);
}

// ---------------------------------------------------------------------------
// Teardown failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn teardown_failure_is_secondary_to_readiness_failure() {
    let fake = Arc::new(FakeLifecycle::new().fail_teardown());
    let orch = orchestrator(&fake, ScriptedPortCheck::failing(2), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload = FnWorkload::new(|_: ()| Ok(()));

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Network));
    assert!(err.teardown_error().is_some());
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Stopping]);
}

#[tokio::test(start_paused = true)]
async fn caller_timeout_during_teardown_still_removes_container() {
    let fake = Arc::new(FakeLifecycle::new().with_teardown_delay(Duration::from_secs(5)));
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload = FnWorkload::new(|_: ()| Ok(()));
    let cancel = CancellationToken::new();
    let spec = ServiceSpec::default();

    let waited = tokio::time::timeout(
        Duration::from_secs(1),
        orch.run(&spec, &connector, &workload, &cancel),
    )
    .await;
    assert!(waited.is_err());
    assert!(fake.final_states().is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}

#[tokio::test(start_paused = true)]
async fn start_failure_removes_created_container() {
    let fake = Arc::new(FakeLifecycle::new().fail_start());
    let orch = orchestrator(&fake, ScriptedPortCheck::succeeding(1), fast_health());
    let connector = ScriptedConnector::new(vec![Ok(())]);
    let workload = FnWorkload::new(|_: ()| Ok(()));

    let err = orch
        .run(
            &ServiceSpec::default(),
            &connector,
            &workload,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Start { teardown: None, .. }));
    assert_eq!(fake.teardowns(), 1);
    assert_eq!(fake.final_states(), vec![LifecycleState::Removed]);
}
