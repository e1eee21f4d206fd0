use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    Absent,
    Building,
    Built,
    Starting,
    Probing,
    Ready,
    Failed,
    Stopping,
    Stopped,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Absent => "ABSENT",
            RunState::Building => "BUILDING",
            RunState::Built => "BUILT",
            RunState::Starting => "STARTING",
            RunState::Probing => "PROBING",
            RunState::Ready => "READY",
            RunState::Failed => "FAILED",
            RunState::Stopping => "STOPPING",
            RunState::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Ready | RunState::Failed | RunState::Stopped)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        if next == RunState::Stopping {
            return self != RunState::Stopping;
        }

        match self {
            RunState::Absent | RunState::Stopped => matches!(
                next,
                RunState::Building | RunState::Starting | RunState::Failed
            ),
            RunState::Building => matches!(next, RunState::Built | RunState::Failed),
            RunState::Built => matches!(next, RunState::Starting | RunState::Failed),
            RunState::Starting => matches!(next, RunState::Probing | RunState::Failed),
            RunState::Probing => matches!(next, RunState::Ready | RunState::Failed),
            RunState::Ready | RunState::Failed => false,
            RunState::Stopping => next == RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a service ended a run without becoming ready.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    BuildFailure { attempts: u32, error: String },
    StartFailure { error: String },
    DependencyFailed { dependency: String },
    ReadinessTimeout { waited: Duration },
}

impl FailureCause {
    /// Hard causes block dependents; a readiness timeout only degrades the run.
    pub fn is_hard(&self) -> bool {
        !matches!(self, FailureCause::ReadinessTimeout { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::BuildFailure { .. } => "BuildFailure",
            FailureCause::StartFailure { .. } => "StartFailure",
            FailureCause::DependencyFailed { .. } => "DependencyFailed",
            FailureCause::ReadinessTimeout { .. } => "ReadinessTimeout",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::BuildFailure { attempts, error } => {
                write!(f, "build failed after {attempts} attempt(s): {error}")
            }
            FailureCause::StartFailure { error } => write!(f, "start failed: {error}"),
            FailureCause::DependencyFailed { dependency } => {
                write!(f, "dependency `{dependency}` failed")
            }
            FailureCause::ReadinessTimeout { waited } => write!(
                f,
                "not ready after {}",
                humantime::format_duration(*waited)
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    ResolvingProfile,
    StartingInfrastructure,
    ProbingInfrastructure,
    GatingBuilds,
    StartingApplications,
    ProbingApplications,
    Summarizing,
    Done,
    Stopping,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "IDLE",
            RunPhase::ResolvingProfile => "RESOLVING_PROFILE",
            RunPhase::StartingInfrastructure => "STARTING_INFRASTRUCTURE",
            RunPhase::ProbingInfrastructure => "PROBING_INFRASTRUCTURE",
            RunPhase::GatingBuilds => "GATING_BUILDS",
            RunPhase::StartingApplications => "STARTING_APPLICATIONS",
            RunPhase::ProbingApplications => "PROBING_APPLICATIONS",
            RunPhase::Summarizing => "SUMMARIZING",
            RunPhase::Done => "DONE",
            RunPhase::Stopping => "STOPPING",
            RunPhase::Failed => "FAILED",
        }
    }

    pub fn is_in_flight(self) -> bool {
        !matches!(
            self,
            RunPhase::Idle | RunPhase::Done | RunPhase::Failed | RunPhase::Stopping
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("service `{service}` is not part of the current run")]
    UnknownService { service: String },
    #[error("service `{service}` cannot move from {from} to {to}")]
    InvalidTransition {
        service: String,
        from: RunState,
        to: RunState,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: RunState,
    pub cause: Option<FailureCause>,
}

impl ServiceStatus {
    fn new(state: RunState) -> Self {
        Self { state, cause: None }
    }

    pub fn is_hard_failure(&self) -> bool {
        self.state == RunState::Failed && self.cause.as_ref().map_or(true, FailureCause::is_hard)
    }
}

/// Per-service lifecycle table. Every change goes through the transition rules.
#[derive(Clone, Debug, Default)]
pub struct RunStateTable {
    services: BTreeMap<String, ServiceStatus>,
}

impl RunStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the table with the services of a new run. Services stopped by an earlier run
    /// stay `Stopped`; everything else starts `Absent`.
    pub fn seed<'a>(&mut self, services: impl IntoIterator<Item = &'a str>) {
        let previous = std::mem::take(&mut self.services);
        for name in services {
            let state = match previous.get(name) {
                Some(status) if status.state == RunState::Stopped => RunState::Stopped,
                _ => RunState::Absent,
            };
            self.services
                .insert(name.to_string(), ServiceStatus::new(state));
        }
    }

    /// Adds services that are not tracked yet, leaving existing entries untouched.
    pub fn track<'a>(&mut self, services: impl IntoIterator<Item = &'a str>) {
        for name in services {
            self.services
                .entry(name.to_string())
                .or_insert_with(|| ServiceStatus::new(RunState::Absent));
        }
    }

    pub fn state(&self, service: &str) -> Option<RunState> {
        self.services.get(service).map(|status| status.state)
    }

    pub fn status(&self, service: &str) -> Option<&ServiceStatus> {
        self.services.get(service)
    }

    /// Moves a service to `next`, returning the state it left.
    pub fn set_state(&mut self, service: &str, next: RunState) -> Result<RunState, TransitionError> {
        let status = self
            .services
            .get_mut(service)
            .ok_or_else(|| TransitionError::UnknownService {
                service: service.to_string(),
            })?;

        if !status.state.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition {
                service: service.to_string(),
                from: status.state,
                to: next,
            });
        }

        let previous = status.state;
        status.state = next;
        if next != RunState::Failed {
            status.cause = None;
        }
        Ok(previous)
    }

    pub fn fail(&mut self, service: &str, cause: FailureCause) -> Result<RunState, TransitionError> {
        let previous = self.set_state(service, RunState::Failed)?;
        if let Some(status) = self.services.get_mut(service) {
            status.cause = Some(cause);
        }
        Ok(previous)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceStatus> {
        self.services.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
