pub mod graph;
pub mod probe;
pub mod profile;
pub mod state;

pub use graph::DependencyGraph;
pub use probe::{
    HealthCheck, NetworkHealthCheck, ProbeError, ProbeOutcome, ProbeSettings, ReadinessProber,
};
pub use profile::{PlannedService, ProfileResolver, ResolvedPlan};
pub use state::{
    FailureCause, RunPhase, RunState, RunStateTable, ServiceStatus, TransitionError,
};
