pub mod build_gate;
pub mod summary;

pub use build_gate::{BuildGate, BuildOutcome};
pub use summary::{RunSummary, EXIT_CANCELLED};

use crate::config::stack::{ServiceDescriptor, StackConfig, Tier, Variant};
use crate::error::OrchestratorError;
use crate::metrics::metrics;
use crate::readiness::{
    FailureCause, HealthCheck, PlannedService, ProbeOutcome, ProfileResolver, ReadinessProber,
    ResolvedPlan, RunPhase, RunState, RunStateTable, ServiceStatus,
};
use crate::retry::RetryPolicy;
use crate::runtime::ContainerRuntime;
use crate::service_event;
use crate::status::StatusSink;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const COMPONENT: &str = "orchestrator";
/// How often `stop` re-signals while waiting for an in-flight run to unwind.
const STOP_RESIGNAL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartRequest {
    pub profile: String,
    pub force: bool,
    pub dev_mode: bool,
}

impl StartRequest {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            force: false,
            dev_mode: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn variant(&self) -> Variant {
        Variant::from_dev_mode(self.dev_mode)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Services in the order they were torn down.
    pub stopped: Vec<String>,
    pub errors: BTreeMap<String, String>,
    pub interrupted_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceHealth {
    pub state: RunState,
    pub healthy: bool,
    pub check: String,
    pub detail: Option<String>,
}

/// Drives startup runs and teardown for one stack declaration.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: ProfileResolver,
    default_profile: String,
    runtime: Arc<dyn ContainerRuntime>,
    prober: ReadinessProber,
    gate: BuildGate,
    sink: StatusSink,
    states: RwLock<RunStateTable>,
    phase: RwLock<RunPhase>,
    run_lock: Mutex<()>,
    shutdown: StdMutex<CancellationToken>,
    last_request: StdMutex<Option<StartRequest>>,
    last_plan: StdMutex<Option<ResolvedPlan>>,
    launched: StdMutex<BTreeSet<String>>,
}

impl Orchestrator {
    pub fn new(
        stack: &StackConfig,
        runtime: Arc<dyn ContainerRuntime>,
        health_check: Arc<dyn HealthCheck>,
        sink: StatusSink,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        let prober = ReadinessProber::new(health_check, stack.defaults.clone());
        let gate = BuildGate::new(
            Arc::clone(&runtime),
            RetryPolicy::from(&stack.defaults.build),
            sink.clone(),
            base_dir,
        );

        Self {
            inner: Arc::new(Inner {
                resolver: ProfileResolver::new(stack),
                default_profile: stack.defaults.default_profile.clone(),
                runtime,
                prober,
                gate,
                sink,
                states: RwLock::new(RunStateTable::new()),
                phase: RwLock::new(RunPhase::Idle),
                run_lock: Mutex::new(()),
                shutdown: StdMutex::new(CancellationToken::new()),
                last_request: StdMutex::new(None),
                last_plan: StdMutex::new(None),
                launched: StdMutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.inner.resolver
    }

    pub fn sink(&self) -> &StatusSink {
        &self.inner.sink
    }

    pub fn default_profile(&self) -> &str {
        &self.inner.default_profile
    }

    pub fn last_request(&self) -> Option<StartRequest> {
        lock(&self.inner.last_request).clone()
    }

    /// Runs the startup phases once for the requested profile.
    ///
    /// Structural problems are reported before anything is built or started. Per-service
    /// failures never abort the run; they are recorded in the returned summary.
    pub async fn start(&self, request: StartRequest) -> Result<RunSummary, OrchestratorError> {
        let Ok(_run) = self.inner.run_lock.try_lock() else {
            return Err(OrchestratorError::AlreadyRunning);
        };

        let shutdown = CancellationToken::new();
        *lock(&self.inner.shutdown) = shutdown.clone();
        self.inner.run(request, shutdown).await
    }

    /// Interrupts an in-flight run, waits for it to unwind, then stops services in reverse
    /// startup order. Individual stop failures are logged and skipped.
    pub async fn stop(&self) -> StopReport {
        let interrupted_run = self.inner.phase.read().await.is_in_flight();
        let _run = self.inner.interrupt_run().await;
        let mut report = self.inner.teardown().await;
        report.interrupted_run = interrupted_run;
        report
    }

    pub async fn restart(&self) -> Result<RunSummary, OrchestratorError> {
        let request = self
            .last_request()
            .ok_or(OrchestratorError::NothingToRestart)?;
        self.stop().await;
        self.start(request).await
    }

    /// One readiness check per tracked service (every declared service when nothing is
    /// tracked yet). Leaves the run state untouched.
    pub async fn health_check(&self) -> BTreeMap<String, ServiceHealth> {
        let snapshot = self.inner.states.read().await.snapshot();
        let graph = self.inner.resolver.graph();

        let targets: Vec<(ServiceDescriptor, RunState)> = if snapshot.is_empty() {
            graph
                .services()
                .iter()
                .map(|service| (service.clone(), RunState::Absent))
                .collect()
        } else {
            snapshot
                .iter()
                .filter_map(|(name, status)| {
                    graph
                        .service(name)
                        .map(|service| (service.clone(), status.state))
                })
                .collect()
        };

        let prober = &self.inner.prober;
        let checks = targets.into_iter().map(|(service, state)| async move {
            let result = prober.probe_once(&service).await;
            let health = ServiceHealth {
                state,
                healthy: result.is_ok(),
                check: service.readiness.check.describe(),
                detail: result.err().map(|err| err.to_string()),
            };
            (service.name, health)
        });

        futures_util::future::join_all(checks)
            .await
            .into_iter()
            .collect()
    }

    pub async fn run_states(&self) -> BTreeMap<String, ServiceStatus> {
        self.inner.states.read().await.snapshot()
    }

    pub async fn phase(&self) -> RunPhase {
        *self.inner.phase.read().await
    }
}

impl Inner {
    async fn run(
        self: &Arc<Self>,
        request: StartRequest,
        shutdown: CancellationToken,
    ) -> Result<RunSummary, OrchestratorError> {
        let started = Instant::now();
        let variant = request.variant();
        let force = request.force;

        self.set_phase(RunPhase::ResolvingProfile, None).await;
        let plan = match self.resolver.plan(&request.profile, variant) {
            Ok(plan) => plan,
            Err(err) => {
                self.set_phase(RunPhase::Failed, None).await;
                self.sink.error(COMPONENT, err.to_string());
                return Err(err.into());
            }
        };

        self.sink.info(
            COMPONENT,
            format!(
                "starting profile `{}` ({}{}): {}",
                plan.profile,
                variant.as_str(),
                if force { ", forced rebuild" } else { "" },
                plan.names().join(", ")
            ),
        );
        *lock(&self.last_request) = Some(request);
        *lock(&self.last_plan) = Some(plan.clone());
        self.states.write().await.seed(plan.names());

        let infrastructure = plan.waves(Tier::Infrastructure);
        let wave_count = infrastructure.len();
        for (index, wave) in infrastructure.into_iter().enumerate() {
            if shutdown.is_cancelled() {
                break;
            }
            let wave = owned(wave);
            self.set_phase(
                RunPhase::StartingInfrastructure,
                Some(wave_label(index, wave_count, &wave)),
            )
            .await;
            self.dispatch(wave.clone(), &shutdown, move |inner, service, token| async move {
                if inner.build_if_gated(&service, force, &token).await {
                    inner.start_service(&service).await;
                }
            })
            .await;

            let launched = self.in_state(&wave, RunState::Starting).await;
            self.set_phase(
                RunPhase::ProbingInfrastructure,
                Some(wave_label(index, wave_count, &launched)),
            )
            .await;
            self.dispatch(launched, &shutdown, |inner, service, token| async move {
                inner.probe_service(&service, &token).await;
            })
            .await;
        }

        let applications = plan.waves(Tier::Application);
        let gated = plan
            .tier(Tier::Application)
            .any(|service| service.descriptor.build.is_some());
        if gated {
            // Wave order lets a failed build block its dependents before they are built.
            let wave_count = applications.len();
            for (index, wave) in applications.iter().enumerate() {
                if shutdown.is_cancelled() {
                    break;
                }
                let wave = owned(wave.clone());
                self.set_phase(
                    RunPhase::GatingBuilds,
                    Some(wave_label(index, wave_count, &wave)),
                )
                .await;
                self.dispatch(wave, &shutdown, move |inner, service, token| async move {
                    inner.build_if_gated(&service, force, &token).await;
                })
                .await;
            }
        }

        let wave_count = applications.len();
        for (index, wave) in applications.into_iter().enumerate() {
            if shutdown.is_cancelled() {
                break;
            }
            let wave = self.startable(owned(wave)).await;
            self.set_phase(
                RunPhase::StartingApplications,
                Some(wave_label(index, wave_count, &wave)),
            )
            .await;
            self.dispatch(wave.clone(), &shutdown, |inner, service, _token| async move {
                inner.start_service(&service).await;
            })
            .await;

            let launched = self.in_state(&wave, RunState::Starting).await;
            self.set_phase(
                RunPhase::ProbingApplications,
                Some(wave_label(index, wave_count, &launched)),
            )
            .await;
            self.dispatch(launched, &shutdown, |inner, service, token| async move {
                inner.probe_service(&service, &token).await;
            })
            .await;
        }

        Ok(self.summarize(&plan, started, shutdown.is_cancelled()).await)
    }

    async fn summarize(&self, plan: &ResolvedPlan, started: Instant, cancelled: bool) -> RunSummary {
        if cancelled {
            self.sink
                .warning(COMPONENT, "startup interrupted by stop request");
        } else {
            self.set_phase(RunPhase::Summarizing, None).await;
        }

        let states = self.states.read().await.snapshot();
        let access_points: BTreeMap<String, Vec<String>> = plan
            .services
            .iter()
            .filter(|service| {
                states.get(service.name()).map(|status| status.state) == Some(RunState::Ready)
            })
            .map(|service| (service.name().to_string(), service.descriptor.access_points()))
            .filter(|(_, points)| !points.is_empty())
            .collect();

        for (name, points) in &access_points {
            self.sink
                .success(name, format!("reachable at {}", points.join(", ")));
        }

        let phase = if cancelled {
            RunPhase::Stopping
        } else {
            RunPhase::Done
        };
        let summary = RunSummary {
            profile: plan.profile.clone(),
            variant: plan.variant,
            phase,
            order: plan.names().into_iter().map(str::to_string).collect(),
            states,
            access_points,
            cancelled,
            elapsed: started.elapsed(),
        };

        for service in &plan.services {
            let counters = metrics().service(service.name());
            service_event!(
                debug,
                COMPONENT,
                "counters",
                service = service.name(),
                build_attempts = counters.build_attempts,
                build_failures = counters.build_failures,
                builds_skipped = counters.builds_skipped,
                probe_attempts = counters.probe_attempts,
                probe_timeouts = counters.probe_timeouts,
                stop_errors = counters.stop_errors
            );
        }

        let ready = summary.ready().len();
        if summary.is_degraded() {
            let not_ready: Vec<&str> = summary
                .order
                .iter()
                .map(String::as_str)
                .filter(|name| summary.state(name) != Some(RunState::Ready))
                .collect();
            self.sink.warning(
                COMPONENT,
                format!(
                    "{ready}/{} services ready; not ready: {}",
                    summary.order.len(),
                    not_ready.join(", ")
                ),
            );
        } else {
            self.sink
                .success(COMPONENT, format!("all {ready} services ready"));
        }

        if !cancelled {
            self.set_phase(RunPhase::Done, None).await;
        }
        summary
    }

    /// Runs `operation` for every service of a wave concurrently and waits for all of them.
    async fn dispatch<F, Fut>(
        self: &Arc<Self>,
        services: Vec<PlannedService>,
        shutdown: &CancellationToken,
        operation: F,
    ) where
        F: Fn(Arc<Inner>, PlannedService, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut wave = JoinSet::new();
        for service in services {
            wave.spawn(operation(Arc::clone(self), service, shutdown.clone()));
        }
        while let Some(joined) = wave.join_next().await {
            if let Err(err) = joined {
                tracing::error!(component = COMPONENT, error = %err, "service task failed");
            }
        }
    }

    /// Returns `false` when the service cannot proceed to start.
    async fn build_if_gated(
        &self,
        service: &PlannedService,
        force: bool,
        shutdown: &CancellationToken,
    ) -> bool {
        if self.block_if_dependency_failed(service).await {
            return false;
        }
        let descriptor = &service.descriptor;
        if descriptor.build.is_none() || !self.gate.check(descriptor, service.variant, force).await
        {
            return true;
        }

        self.transition(service.name(), RunState::Building).await;
        match self.gate.build(descriptor, service.variant, shutdown).await {
            BuildOutcome::Built { .. } | BuildOutcome::Skipped => {
                self.transition(service.name(), RunState::Built).await;
                true
            }
            BuildOutcome::Failed { attempts, error } => {
                self.fail(
                    service.name(),
                    FailureCause::BuildFailure { attempts, error },
                    None,
                )
                .await;
                false
            }
            BuildOutcome::Cancelled { .. } => false,
        }
    }

    async fn start_service(&self, service: &PlannedService) {
        if self.block_if_dependency_failed(service).await {
            return;
        }

        let name = service.name();
        self.transition(name, RunState::Starting).await;
        lock(&self.launched).insert(name.to_string());
        match self
            .runtime
            .start(&service.descriptor, service.variant)
            .await
        {
            Ok(()) => {
                self.sink.info(name, "container started");
            }
            Err(err) => {
                self.fail(
                    name,
                    FailureCause::StartFailure {
                        error: err.to_string(),
                    },
                    None,
                )
                .await;
            }
        }
    }

    async fn probe_service(&self, service: &PlannedService, shutdown: &CancellationToken) {
        let name = service.name();
        let descriptor = &service.descriptor;
        let settings = self.prober.settings_for(descriptor);

        self.transition(name, RunState::Probing).await;
        self.sink.info(
            name,
            format!(
                "waiting for {} (timeout {}, every {})",
                descriptor.readiness.check.describe(),
                humantime::format_duration(settings.timeout),
                humantime::format_duration(settings.interval)
            ),
        );

        match self.prober.wait_ready(descriptor, settings, shutdown).await {
            ProbeOutcome::Ready { attempts, elapsed } => {
                self.transition(name, RunState::Ready).await;
                self.sink.success(
                    name,
                    format!(
                        "ready after {}ms ({attempts} check(s))",
                        elapsed.as_millis()
                    ),
                );
            }
            ProbeOutcome::TimedOut {
                attempts,
                last_error,
                ..
            } => {
                let detail = format!("{attempts} check(s), last error: {last_error}");
                self.fail(
                    name,
                    FailureCause::ReadinessTimeout {
                        waited: settings.timeout,
                    },
                    Some(detail),
                )
                .await;
            }
            ProbeOutcome::Cancelled { .. } => {
                self.sink
                    .warning(name, "readiness wait interrupted by stop request");
            }
        }
    }

    /// Fails the service when one of its dependencies failed hard.
    async fn block_if_dependency_failed(&self, service: &PlannedService) -> bool {
        let blocker = {
            let states = self.states.read().await;
            service
                .descriptor
                .depends_on
                .iter()
                .find(|dependency| {
                    states
                        .status(dependency)
                        .is_some_and(ServiceStatus::is_hard_failure)
                })
                .cloned()
        };

        match blocker {
            Some(dependency) => {
                self.fail(
                    service.name(),
                    FailureCause::DependencyFailed { dependency },
                    None,
                )
                .await;
                true
            }
            None => false,
        }
    }

    /// Wave members that may still be started: not failed and not left mid-build.
    async fn startable(&self, wave: Vec<PlannedService>) -> Vec<PlannedService> {
        let states = self.states.read().await;
        wave.into_iter()
            .filter(|service| {
                matches!(
                    states.state(service.name()),
                    Some(RunState::Absent | RunState::Stopped | RunState::Built)
                )
            })
            .collect()
    }

    async fn in_state(&self, wave: &[PlannedService], state: RunState) -> Vec<PlannedService> {
        let states = self.states.read().await;
        wave.iter()
            .filter(|service| states.state(service.name()) == Some(state))
            .cloned()
            .collect()
    }

    async fn transition(&self, service: &str, next: RunState) {
        let result = self.states.write().await.set_state(service, next);
        match result {
            Ok(previous) => {
                let phase = *self.phase.read().await;
                service_event!(
                    info,
                    COMPONENT,
                    "transition",
                    service = service,
                    phase = phase,
                    state_from = previous,
                    state_to = next
                );
                self.sink.info(service, format!("{previous} -> {next}"));
            }
            Err(err) => {
                tracing::warn!(component = COMPONENT, error = %err, "state transition rejected");
            }
        }
    }

    async fn fail(&self, service: &str, cause: FailureCause, detail: Option<String>) {
        let result = self.states.write().await.fail(service, cause.clone());
        let previous = match result {
            Ok(previous) => previous,
            Err(err) => {
                tracing::warn!(component = COMPONENT, error = %err, "state transition rejected");
                return;
            }
        };

        service_event!(
            warn,
            COMPONENT,
            "failed",
            service = service,
            state_from = previous,
            cause = cause.kind()
        );
        let message = match detail {
            Some(detail) => format!("{previous} -> FAILED: {cause} ({detail})"),
            None => format!("{previous} -> FAILED: {cause}"),
        };
        if cause.is_hard() {
            self.sink.error(service, message);
        } else {
            self.sink
                .warning(service, format!("{message}; continuing startup"));
        }
    }

    async fn set_phase(&self, phase: RunPhase, detail: Option<String>) {
        *self.phase.write().await = phase;
        tracing::debug!(component = COMPONENT, phase = %phase, "phase entered");
        if let Some(detail) = detail {
            self.sink
                .info(COMPONENT, format!("phase {phase}: {detail}"));
        }
    }

    /// Cancels the current run and keeps re-signalling until it releases the run lock, so a
    /// run that installs a fresh token concurrently is interrupted as well.
    async fn interrupt_run(&self) -> MutexGuard<'_, ()> {
        loop {
            lock(&self.shutdown).cancel();
            tokio::select! {
                guard = self.run_lock.lock() => return guard,
                _ = tokio::time::sleep(STOP_RESIGNAL_INTERVAL) => {}
            }
        }
    }

    async fn teardown(&self) -> StopReport {
        self.set_phase(RunPhase::Stopping, Some("tearing down services".to_string()))
            .await;

        let targets = self.stop_targets();
        self.states
            .write()
            .await
            .track(targets.iter().map(|service| service.name.as_str()));

        let mut report = StopReport::default();
        for service in &targets {
            let name = service.name.as_str();
            self.transition(name, RunState::Stopping).await;
            match self.runtime.stop(service).await {
                Ok(()) => {
                    self.sink.info(name, "container stopped");
                }
                Err(err) => {
                    metrics().record_stop_error(name);
                    self.sink
                        .warning(name, format!("stop failed, continuing teardown: {err}"));
                    report.errors.insert(name.to_string(), err.to_string());
                }
            }
            self.transition(name, RunState::Stopped).await;
            report.stopped.push(name.to_string());
        }

        lock(&self.launched).clear();
        self.sink.success(
            COMPONENT,
            format!(
                "teardown finished: {} stopped, {} error(s)",
                report.stopped.len(),
                report.errors.len()
            ),
        );
        self.set_phase(RunPhase::Idle, None).await;
        report
    }

    /// Services to stop, applications first, each tier in reverse startup order. Falls back to
    /// every declared service when nothing was planned or launched in this process.
    fn stop_targets(&self) -> Vec<ServiceDescriptor> {
        let graph = self.resolver.graph();
        let planned: Vec<String> = lock(&self.last_plan)
            .as_ref()
            .map(|plan| plan.names().into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        let launched = lock(&self.launched).clone();

        let declared: Vec<usize> = graph.full_order().unwrap_or_else(|_| {
            let mut ordinals: Vec<usize> = (0..graph.len()).collect();
            ordinals.sort_by_key(|&ordinal| graph.services()[ordinal].tier);
            ordinals
        });

        let mut selected: Vec<ServiceDescriptor> = if planned.is_empty() && launched.is_empty() {
            declared
                .iter()
                .map(|&ordinal| graph.services()[ordinal].clone())
                .collect()
        } else {
            let mut names = planned.clone();
            for &ordinal in &declared {
                let name = &graph.services()[ordinal].name;
                if launched.contains(name) && !planned.contains(name) {
                    names.push(name.clone());
                }
            }
            names
                .iter()
                .filter_map(|name| graph.service(name).cloned())
                .collect()
        };

        selected.sort_by_key(|service| service.tier);
        selected.reverse();
        selected
    }
}

fn owned(wave: Vec<&PlannedService>) -> Vec<PlannedService> {
    wave.into_iter().cloned().collect()
}

fn names(services: &[PlannedService]) -> String {
    services
        .iter()
        .map(PlannedService::name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn wave_label(index: usize, count: usize, services: &[PlannedService]) -> String {
    if services.is_empty() {
        format!("wave {}/{count}: nothing to do", index + 1)
    } else {
        format!("wave {}/{count}: {}", index + 1, names(services))
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
