use crate::config::{LaunchpadConfig, StackConfig};
use crate::error::{Context, Result};
use crate::orchestrator::{Orchestrator, RunSummary, StartRequest, StopReport};
use crate::readiness::{HealthCheck, NetworkHealthCheck};
use crate::runtime::{ComposeRuntime, ContainerRuntime};
use crate::status::StatusSink;
use std::sync::Arc;

/// Result of a start that may have been interrupted by Ctrl+C.
#[derive(Debug)]
pub struct StartOutcome {
    pub summary: RunSummary,
    /// Present when a signal interrupted the run and services were torn down.
    pub teardown: Option<StopReport>,
}

/// Process wiring: configuration, log sink, container runtime, prober and orchestrator.
pub struct LaunchpadApp {
    config: LaunchpadConfig,
    stack: StackConfig,
    orchestrator: Orchestrator,
}

impl LaunchpadApp {
    pub fn initialise(config: LaunchpadConfig) -> Result<Self> {
        let stack = config
            .load_stack()
            .context("failed to load stack declaration")?;
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(ComposeRuntime::new(config.runtime.clone()));
        let health: Arc<dyn HealthCheck> =
            Arc::new(NetworkHealthCheck::new().context("failed to construct HTTP client")?);
        let sink = StatusSink::open(&config.log_dir);

        Ok(Self::from_parts(config, stack, runtime, health, sink))
    }

    pub fn from_parts(
        config: LaunchpadConfig,
        stack: StackConfig,
        runtime: Arc<dyn ContainerRuntime>,
        health: Arc<dyn HealthCheck>,
        sink: StatusSink,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            &stack,
            runtime,
            health,
            sink,
            config.runtime.working_dir(),
        );
        Self {
            config,
            stack,
            orchestrator,
        }
    }

    pub fn config(&self) -> &LaunchpadConfig {
        &self.config
    }

    pub fn stack(&self) -> &StackConfig {
        &self.stack
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Starts the requested profile. Ctrl+C interrupts the run and tears services down.
    pub async fn start_until_signal(&self, request: StartRequest) -> Result<StartOutcome> {
        let orchestrator = self.orchestrator.clone();
        let mut run = tokio::spawn(async move { orchestrator.start(request).await });

        tokio::select! {
            joined = &mut run => {
                let summary = joined??;
                Ok(StartOutcome { summary, teardown: None })
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(component = "app", "shutdown signal received; stopping services");
                let report = self.orchestrator.stop().await;
                let summary = run.await??;
                Ok(StartOutcome { summary, teardown: Some(report) })
            }
        }
    }

    /// Stops every known service, then starts again with `request`.
    pub async fn restart(&self, request: StartRequest) -> Result<(StopReport, StartOutcome)> {
        let report = self.orchestrator.stop().await;
        let outcome = self.start_until_signal(request).await?;
        Ok((report, outcome))
    }
}
