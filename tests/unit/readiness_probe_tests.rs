use crate::support::config::test_stack;
use crate::support::mocks::{Script, ScriptedHealthCheck};
use launchpad::readiness::{ProbeError, ProbeOutcome, ProbeSettings, ReadinessProber};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn prober(health: &ScriptedHealthCheck) -> ReadinessProber {
    ReadinessProber::new(Arc::new(health.clone()), test_stack().defaults)
}

fn settings(timeout_ms: u64, interval_ms: u64) -> ProbeSettings {
    ProbeSettings {
        timeout: Duration::from_millis(timeout_ms),
        interval: Duration::from_millis(interval_ms),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn becomes_ready_once_the_check_passes() {
    let stack = test_stack();
    let health = ScriptedHealthCheck::new();
    health.script("postgres", Script::HealthyAfter(2));
    let postgres = stack.service("postgres").expect("declared");

    let outcome = prober(&health)
        .wait_ready(postgres, settings(500, 5), &CancellationToken::new())
        .await;

    match outcome {
        ProbeOutcome::Ready { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected ready, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn gives_up_at_the_deadline() {
    let stack = test_stack();
    let health = ScriptedHealthCheck::new();
    health.script("neo4j", Script::Unhealthy);
    let neo4j = stack.service("neo4j").expect("declared");

    let started = std::time::Instant::now();
    let outcome = prober(&health)
        .wait_ready(neo4j, settings(80, 10), &CancellationToken::new())
        .await;

    match outcome {
        ProbeOutcome::TimedOut {
            attempts,
            last_error,
            ..
        } => {
            assert!(attempts >= 2, "expected repeated checks, got {attempts}");
            assert!(matches!(last_error, ProbeError::Connect { .. }));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_ends_the_wait_early() {
    let stack = test_stack();
    let health = ScriptedHealthCheck::new();
    health.script("minio", Script::Unhealthy);
    let minio = stack.service("minio").expect("declared").clone();
    let prober = prober(&health);
    let shutdown = CancellationToken::new();

    let waiter = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            prober
                .wait_ready(&minio, settings(60_000, 20), &shutdown)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("wait ends promptly after cancellation")
        .expect("probe task joins");
    assert!(matches!(outcome, ProbeOutcome::Cancelled { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_once_never_retries() {
    let stack = test_stack();
    let health = ScriptedHealthCheck::new();
    health.script("weaviate", Script::Unhealthy);
    let weaviate = stack.service("weaviate").expect("declared");

    let result = prober(&health).probe_once(weaviate).await;
    assert!(result.is_err());
    assert_eq!(health.checks_of("weaviate"), 1);
}
