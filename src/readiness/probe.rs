use crate::config::stack::{ReadinessCheck, ServiceDescriptor, StackDefaults};
use crate::metrics::metrics;
use crate::retry::sleep_with_shutdown;
use crate::service_event;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lower bound for a single poll so the last attempt before the deadline is still meaningful.
const MIN_ATTEMPT_BUDGET: Duration = Duration::from_millis(50);
/// Upper bound for a one-off check issued by a health sweep.
const SWEEP_ATTEMPT_BUDGET: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("{url} answered with unexpected status {status}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("check against {target} did not finish within {budget_ms}ms")]
    AttemptTimedOut { target: String, budget_ms: u64 },
}

/// One readiness check against a running service.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, service: &str, check: &ReadinessCheck) -> Result<(), ProbeError>;
}

/// TCP reachability and HTTP status checks.
#[derive(Clone)]
pub struct NetworkHealthCheck {
    client: reqwest::Client,
}

impl NetworkHealthCheck {
    pub fn new() -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(SWEEP_ATTEMPT_BUDGET)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthCheck for NetworkHealthCheck {
    async fn check(&self, _service: &str, check: &ReadinessCheck) -> Result<(), ProbeError> {
        match check {
            ReadinessCheck::None => Ok(()),
            ReadinessCheck::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
                .await
                .map(drop)
                .map_err(|err| ProbeError::Connect {
                    target: format!("{host}:{port}"),
                    reason: err.to_string(),
                }),
            ReadinessCheck::Http { url, .. } => {
                let response =
                    self.client
                        .get(url)
                        .send()
                        .await
                        .map_err(|err| ProbeError::Request {
                            url: url.clone(),
                            reason: err.to_string(),
                        })?;
                let status = response.status().as_u16();
                if check.accepts_status(status) {
                    Ok(())
                } else {
                    Err(ProbeError::UnexpectedStatus {
                        url: url.clone(),
                        status,
                    })
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready {
        attempts: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_error: ProbeError,
    },
    Cancelled {
        attempts: u32,
    },
}

/// Polls a service's readiness check until it passes, the deadline elapses, or the run is
/// cancelled. Waits are always bounded.
#[derive(Clone)]
pub struct ReadinessProber {
    check: Arc<dyn HealthCheck>,
    defaults: StackDefaults,
}

impl ReadinessProber {
    pub fn new(check: Arc<dyn HealthCheck>, defaults: StackDefaults) -> Self {
        Self { check, defaults }
    }

    /// Per-service overrides on top of the tier defaults.
    pub fn settings_for(&self, service: &ServiceDescriptor) -> ProbeSettings {
        ProbeSettings {
            timeout: service
                .readiness
                .timeout
                .unwrap_or_else(|| self.defaults.readiness_timeout(service.tier)),
            interval: service
                .readiness
                .interval
                .unwrap_or(self.defaults.probe_interval),
        }
    }

    pub async fn wait_ready(
        &self,
        service: &ServiceDescriptor,
        settings: ProbeSettings,
        shutdown: &CancellationToken,
    ) -> ProbeOutcome {
        let check = &service.readiness.check;
        if *check == ReadinessCheck::None {
            return ProbeOutcome::Ready {
                attempts: 0,
                elapsed: Duration::ZERO,
            };
        }

        let started = Instant::now();
        let deadline = started + settings.timeout;
        let mut attempts = 0;

        let last_error = loop {
            if shutdown.is_cancelled() {
                return ProbeOutcome::Cancelled { attempts };
            }

            attempts += 1;
            let budget = deadline
                .saturating_duration_since(Instant::now())
                .max(MIN_ATTEMPT_BUDGET);
            let result = tokio::select! {
                _ = shutdown.cancelled() => return ProbeOutcome::Cancelled { attempts },
                result = self.attempt(&service.name, check, budget) => result,
            };

            let err = match result {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    metrics().record_probe_ready(&service.name, attempts, elapsed);
                    service_event!(
                        debug,
                        "probe",
                        "ready",
                        service = service.name,
                        attempts = attempts,
                        elapsed_ms = elapsed.as_millis()
                    );
                    return ProbeOutcome::Ready { attempts, elapsed };
                }
                Err(err) => {
                    service_event!(
                        debug,
                        "probe",
                        "not_ready",
                        service = service.name,
                        attempts = attempts,
                        error = err
                    );
                    err
                }
            };

            let now = Instant::now();
            if now >= deadline {
                break err;
            }
            let wait = settings.interval.min(deadline - now);
            if sleep_with_shutdown(wait, shutdown).await {
                return ProbeOutcome::Cancelled { attempts };
            }
            if Instant::now() >= deadline {
                break err;
            }
        };

        metrics().record_probe_timeout(&service.name, attempts);
        ProbeOutcome::TimedOut {
            attempts,
            elapsed: started.elapsed(),
            last_error,
        }
    }

    /// A single bounded check, used by health sweeps. Never retries.
    pub async fn probe_once(&self, service: &ServiceDescriptor) -> Result<(), ProbeError> {
        let budget = self
            .settings_for(service)
            .interval
            .clamp(MIN_ATTEMPT_BUDGET, SWEEP_ATTEMPT_BUDGET);
        self.attempt(&service.name, &service.readiness.check, budget)
            .await
    }

    async fn attempt(
        &self,
        service: &str,
        check: &ReadinessCheck,
        budget: Duration,
    ) -> Result<(), ProbeError> {
        match tokio::time::timeout(budget, self.check.check(service, check)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::AttemptTimedOut {
                target: check.describe(),
                budget_ms: budget.as_millis() as u64,
            }),
        }
    }
}
