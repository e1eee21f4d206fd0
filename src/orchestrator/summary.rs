use crate::config::stack::Variant;
use crate::readiness::{FailureCause, RunPhase, RunState, ServiceStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Exit status for a run interrupted by a stop request.
pub const EXIT_CANCELLED: u8 = 130;

/// Terminal view of one startup run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub profile: String,
    pub variant: Variant,
    pub phase: RunPhase,
    /// Service names in plan order.
    pub order: Vec<String>,
    pub states: BTreeMap<String, ServiceStatus>,
    pub access_points: BTreeMap<String, Vec<String>>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn state(&self, service: &str) -> Option<RunState> {
        self.states.get(service).map(|status| status.state)
    }

    pub fn services_in(&self, state: RunState) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.state(name) == Some(state))
            .map(String::as_str)
            .collect()
    }

    pub fn ready(&self) -> Vec<&str> {
        self.services_in(RunState::Ready)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.services_in(RunState::Failed)
    }

    /// Failures that blocked the service (and its dependents), excluding readiness timeouts.
    pub fn failures(&self) -> BTreeMap<&str, &FailureCause> {
        self.causes(|cause| cause.is_hard())
    }

    pub fn timed_out(&self) -> Vec<&str> {
        self.causes(|cause| !cause.is_hard()).into_keys().collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.order.iter().any(|name| self.state(name) != Some(RunState::Ready))
    }

    /// Completed runs exit 0 whether or not they are degraded.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_CANCELLED
        } else {
            0
        }
    }

    fn causes(&self, keep: impl Fn(&FailureCause) -> bool) -> BTreeMap<&str, &FailureCause> {
        self.states
            .iter()
            .filter_map(|(name, status)| {
                status
                    .cause
                    .as_ref()
                    .filter(|cause| keep(cause))
                    .map(|cause| (name.as_str(), cause))
            })
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.order.iter().map(String::len).max().unwrap_or(0);
        writeln!(
            f,
            "Startup summary: profile `{}` ({}), {} in {}",
            self.profile,
            self.variant.as_str(),
            if self.cancelled { "cancelled" } else { "completed" },
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64)),
        )?;

        for name in &self.order {
            let Some(status) = self.states.get(name) else {
                continue;
            };
            write!(f, "  {name:<width$}  {:<8}", status.state.as_str())?;
            match &status.cause {
                Some(cause) if cause.is_hard() => write!(f, "  {cause}")?,
                Some(cause) => write!(f, "  {cause} (startup continued)")?,
                None => {}
            }
            writeln!(f)?;
        }

        if !self.access_points.is_empty() {
            writeln!(f, "Access points:")?;
            for (name, points) in &self.access_points {
                writeln!(f, "  {name:<width$}  {}", points.join(", "))?;
            }
        }

        let ready = self.ready().len();
        write!(f, "{ready}/{} services ready", self.order.len())
    }
}
