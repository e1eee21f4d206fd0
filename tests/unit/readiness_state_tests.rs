use launchpad::readiness::{FailureCause, RunState, RunStateTable, TransitionError};
use std::time::Duration;

fn table() -> RunStateTable {
    let mut table = RunStateTable::new();
    table.seed(["postgres", "backend"]);
    table
}

#[test]
fn lifecycle_walks_through_build_start_and_probe() {
    let mut table = table();
    for next in [
        RunState::Building,
        RunState::Built,
        RunState::Starting,
        RunState::Probing,
        RunState::Ready,
        RunState::Stopping,
        RunState::Stopped,
    ] {
        table
            .set_state("backend", next)
            .expect("lifecycle transition is allowed");
    }
    assert_eq!(table.state("backend"), Some(RunState::Stopped));
}

#[test]
fn ready_cannot_fall_back_to_probing() {
    let mut table = table();
    table.set_state("postgres", RunState::Starting).expect("start");
    table.set_state("postgres", RunState::Probing).expect("probe");
    table.set_state("postgres", RunState::Ready).expect("ready");

    let err = table
        .set_state("postgres", RunState::Probing)
        .expect_err("ready is settled");
    assert_eq!(
        err,
        TransitionError::InvalidTransition {
            service: "postgres".to_string(),
            from: RunState::Ready,
            to: RunState::Probing,
        }
    );
}

#[test]
fn timeouts_are_soft_failures() {
    let mut table = table();
    table.set_state("postgres", RunState::Starting).expect("start");
    table.set_state("postgres", RunState::Probing).expect("probe");
    table
        .fail(
            "postgres",
            FailureCause::ReadinessTimeout {
                waited: Duration::from_secs(120),
            },
        )
        .expect("probing may fail");

    let status = table.status("postgres").expect("tracked");
    assert_eq!(status.state, RunState::Failed);
    assert!(!status.is_hard_failure());

    table
        .fail(
            "backend",
            FailureCause::DependencyFailed {
                dependency: "postgres".to_string(),
            },
        )
        .expect("absent may fail");
    assert!(table.status("backend").expect("tracked").is_hard_failure());
}

#[test]
fn reseeding_keeps_stopped_services_and_forgets_the_rest() {
    let mut table = table();
    table.set_state("postgres", RunState::Stopping).expect("stopping");
    table.set_state("postgres", RunState::Stopped).expect("stopped");
    table.set_state("backend", RunState::Starting).expect("start");

    table.seed(["postgres", "backend", "frontend"]);
    assert_eq!(table.state("postgres"), Some(RunState::Stopped));
    assert_eq!(table.state("backend"), Some(RunState::Absent));
    assert_eq!(table.state("frontend"), Some(RunState::Absent));
    assert_eq!(table.len(), 3);
}

#[test]
fn unknown_services_are_rejected() {
    let mut table = table();
    assert!(matches!(
        table.set_state("minio", RunState::Starting),
        Err(TransitionError::UnknownService { .. })
    ));
}
