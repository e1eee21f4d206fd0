use crate::support::config::test_stack;
use crate::support::mocks::{MockRuntime, RuntimeCall};
use launchpad::config::stack::Variant;
use launchpad::orchestrator::{BuildGate, BuildOutcome};
use launchpad::retry::RetryPolicy;
use launchpad::status::{Level, LogFilter, StatusSink};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn gate(runtime: &MockRuntime, sink: &StatusSink, base_dir: &Path) -> BuildGate {
    BuildGate::new(
        Arc::new(runtime.clone()),
        RetryPolicy::new(3, Duration::from_millis(5)),
        sink.clone(),
        base_dir,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn built_image_is_reused_until_inputs_change() {
    let stack = test_stack();
    let backend = stack.service("backend").expect("declared");
    let runtime = MockRuntime::new();
    let sink = StatusSink::in_memory();
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = gate(&runtime, &sink, dir.path());

    assert!(gate.check(backend, Variant::Release, false).await);
    let outcome = gate
        .build(backend, Variant::Release, &CancellationToken::new())
        .await;
    assert_eq!(outcome, BuildOutcome::Built { attempts: 1 });

    assert!(!gate.check(backend, Variant::Release, false).await);
    assert!(gate.check(backend, Variant::Dev, false).await);
    assert!(gate.check(backend, Variant::Release, true).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried() {
    let stack = test_stack();
    let frontend = stack.service("frontend").expect("declared");
    let runtime = MockRuntime::new();
    runtime.fail_builds("frontend", 2);
    let sink = StatusSink::in_memory();
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = gate(&runtime, &sink, dir.path())
        .build(frontend, Variant::Release, &CancellationToken::new())
        .await;

    assert_eq!(outcome, BuildOutcome::Built { attempts: 3 });
    assert_eq!(runtime.builds_of("frontend"), 3);
    let retries = sink.query(LogFilter::all().with_level(Level::Warning));
    assert_eq!(retries.count(), 2);
    assert!(retries
        .iter()
        .all(|entry| entry.message.contains("retrying in 5ms")));
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_builds_report_failure() {
    let stack = test_stack();
    let frontend = stack.service("frontend").expect("declared");
    let runtime = MockRuntime::new();
    runtime.fail_builds("frontend", 10);
    let sink = StatusSink::in_memory();
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = gate(&runtime, &sink, dir.path())
        .build(frontend, Variant::Release, &CancellationToken::new())
        .await;

    match outcome {
        BuildOutcome::Failed { attempts, error } => {
            assert_eq!(attempts, 3);
            assert!(error.contains("build of frontend failed"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(runtime.builds_of("frontend"), 3);
    assert!(!runtime
        .calls()
        .iter()
        .any(|call| matches!(call, RuntimeCall::Start { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn editing_a_watched_file_invalidates_the_image() {
    let stack = test_stack();
    let mut backend = stack.service("backend").expect("declared").clone();
    if let Some(build) = backend.build.as_mut() {
        build.watch = vec!["requirements.txt".to_string()];
    }
    let runtime = MockRuntime::new();
    let sink = StatusSink::in_memory();
    let dir = tempfile::tempdir().expect("tempdir");
    let requirements = dir.path().join("requirements.txt");
    std::fs::write(&requirements, "fastapi==0.110\n").expect("write requirements");
    let gate = gate(&runtime, &sink, dir.path());

    gate.build(&backend, Variant::Release, &CancellationToken::new())
        .await;
    assert!(!gate.check(&backend, Variant::Release, false).await);

    std::fs::write(&requirements, "fastapi==0.111\n").expect("rewrite requirements");
    assert!(gate.check(&backend, Variant::Release, false).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn prebuilt_images_skip_the_gate() {
    let stack = test_stack();
    let postgres = stack.service("postgres").expect("declared");
    let runtime = MockRuntime::new();
    let sink = StatusSink::in_memory();
    let dir = tempfile::tempdir().expect("tempdir");
    let gate = gate(&runtime, &sink, dir.path());

    assert!(!gate.check(postgres, Variant::Release, true).await);
    assert_eq!(
        gate.build(postgres, Variant::Release, &CancellationToken::new())
            .await,
        BuildOutcome::Skipped
    );
    assert!(runtime.calls().is_empty());
}
