#![allow(dead_code)]

use async_trait::async_trait;
use launchpad::config::stack::{ReadinessCheck, ServiceDescriptor, Variant};
use launchpad::readiness::{HealthCheck, ProbeError};
use launchpad::runtime::{ContainerRuntime, RuntimeError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeCall {
    Inspect { image: String },
    Build { service: String, variant: Variant },
    Start { service: String, variant: Variant },
    Stop { service: String },
}

/// In-memory container runtime recording every call in order.
#[derive(Clone, Default)]
pub struct MockRuntime {
    inner: Arc<Mutex<RuntimeState>>,
}

#[derive(Default)]
struct RuntimeState {
    fingerprints: HashMap<String, String>,
    build_failures: HashMap<String, u32>,
    start_failures: HashSet<String>,
    stop_failures: HashSet<String>,
    build_delay: Option<Duration>,
    calls: Vec<RuntimeCall>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` builds of `service` fail.
    pub fn fail_builds(&self, service: &str, times: u32) {
        self.state().build_failures.insert(service.to_string(), times);
    }

    pub fn fail_start(&self, service: &str) {
        self.state().start_failures.insert(service.to_string());
    }

    pub fn fail_stop(&self, service: &str) {
        self.state().stop_failures.insert(service.to_string());
    }

    pub fn delay_builds(&self, delay: Duration) {
        self.state().build_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn builds_of(&self, service: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Build { service: s, .. } if s == service))
            .count()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Start { service, .. } => Some(service),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Stop { service } => Some(service),
                _ => None,
            })
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.inner.lock().expect("mock runtime poisoned")
    }
}

fn failed(command: &str, service: &str) -> RuntimeError {
    RuntimeError::Failed {
        command: format!("docker {command} {service}"),
        exit_code: 1,
        stderr: format!("{command} of {service} failed"),
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn artifact_fingerprint(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Inspect {
            image: image.to_string(),
        });
        Ok(state.fingerprints.get(image).cloned())
    }

    async fn build(
        &self,
        service: &ServiceDescriptor,
        variant: Variant,
        fingerprint: &str,
    ) -> Result<(), RuntimeError> {
        let delay = self.state().build_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.calls.push(RuntimeCall::Build {
            service: service.name.clone(),
            variant,
        });
        if let Some(remaining) = state.build_failures.get_mut(&service.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failed("build", &service.name));
            }
        }
        state
            .fingerprints
            .insert(service.image.clone(), fingerprint.to_string());
        Ok(())
    }

    async fn start(&self, service: &ServiceDescriptor, variant: Variant) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Start {
            service: service.name.clone(),
            variant,
        });
        if state.start_failures.contains(&service.name) {
            return Err(failed("compose up", &service.name));
        }
        Ok(())
    }

    async fn stop(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Stop {
            service: service.name.clone(),
        });
        if state.stop_failures.contains(&service.name) {
            return Err(failed("compose stop", &service.name));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Script {
    Healthy,
    HealthyAfter(u32),
    Unhealthy,
}

/// Health check whose answers are scripted per service. Unscripted services are healthy.
#[derive(Clone, Default)]
pub struct ScriptedHealthCheck {
    inner: Arc<Mutex<HealthState>>,
}

#[derive(Default)]
struct HealthState {
    scripts: HashMap<String, Script>,
    checks: HashMap<String, u32>,
}

impl ScriptedHealthCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, service: &str, script: Script) {
        self.state().scripts.insert(service.to_string(), script);
    }

    pub fn checks_of(&self, service: &str) -> u32 {
        self.state().checks.get(service).copied().unwrap_or(0)
    }

    pub fn total_checks(&self) -> u32 {
        self.state().checks.values().sum()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HealthState> {
        self.inner.lock().expect("health check poisoned")
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealthCheck {
    async fn check(&self, service: &str, check: &ReadinessCheck) -> Result<(), ProbeError> {
        let mut state = self.state();
        let count = {
            let counter = state.checks.entry(service.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let script = state
            .scripts
            .get(service)
            .copied()
            .unwrap_or(Script::Healthy);

        let healthy = match script {
            Script::Healthy => true,
            Script::HealthyAfter(failures) => count > failures,
            Script::Unhealthy => false,
        };
        if healthy {
            Ok(())
        } else {
            Err(ProbeError::Connect {
                target: check.describe(),
                reason: "connection refused".to_string(),
            })
        }
    }
}
