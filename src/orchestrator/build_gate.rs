use crate::config::stack::{ServiceDescriptor, Variant};
use crate::error::Result;
use crate::metrics::metrics;
use crate::retry::{run_retry_loop, RetryContext, RetryOutcome, RetryPolicy};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::service_event;
use crate::status::StatusSink;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The service has no build section.
    Skipped,
    Built { attempts: u32 },
    Failed { attempts: u32, error: String },
    Cancelled { attempts: u32 },
}

/// Decides whether a service image must be rebuilt and drives the retried build.
#[derive(Clone)]
pub struct BuildGate {
    runtime: Arc<dyn ContainerRuntime>,
    policy: RetryPolicy,
    sink: StatusSink,
    base_dir: PathBuf,
}

impl BuildGate {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        policy: RetryPolicy,
        sink: StatusSink,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            policy,
            sink,
            base_dir: base_dir.into(),
        }
    }

    /// Hash of the effective build inputs for a variant, including the contents of the
    /// service's `watch` files. `None` for services without a build section.
    pub fn fingerprint(&self, service: &ServiceDescriptor, variant: Variant) -> Option<String> {
        let build = service.build.as_ref()?;
        let mut hasher = DefaultHasher::new();

        service.image.hash(&mut hasher);
        build.context.hash(&mut hasher);
        build.dockerfile.hash(&mut hasher);
        build.target_for(variant).hash(&mut hasher);
        build.args.hash(&mut hasher);

        for watched in &build.watch {
            watched.hash(&mut hasher);
            match std::fs::read(resolve_watch_path(&self.base_dir, watched)) {
                Ok(contents) => contents.hash(&mut hasher),
                Err(_) => "<missing>".hash(&mut hasher),
            }
        }

        Some(format!("{:016x}", hasher.finish()))
    }

    pub async fn needs_build(
        &self,
        service: &ServiceDescriptor,
        variant: Variant,
        force: bool,
    ) -> Result<bool> {
        let Some(expected) = self.fingerprint(service, variant) else {
            return Ok(false);
        };
        if force {
            return Ok(true);
        }

        let recorded = self.runtime.artifact_fingerprint(&service.image).await?;
        Ok(recorded.as_deref() != Some(expected.as_str()))
    }

    /// Gate decision with logging. A failed artifact lookup counts as a missing artifact.
    pub async fn check(&self, service: &ServiceDescriptor, variant: Variant, force: bool) -> bool {
        let needed = match self.needs_build(service, variant, force).await {
            Ok(needed) => needed,
            Err(err) => {
                self.sink.warning(
                    &service.name,
                    format!("could not inspect image {}: {err}; rebuilding", service.image),
                );
                true
            }
        };

        if needed {
            if force {
                self.sink
                    .info(&service.name, format!("forced rebuild of {}", service.image));
            }
        } else {
            metrics().record_build_skipped(&service.name);
            if service.build.is_some() {
                self.sink.info(
                    &service.name,
                    format!("image {} is up to date, reusing it", service.image),
                );
            }
        }
        needed
    }

    pub async fn build(
        &self,
        service: &ServiceDescriptor,
        variant: Variant,
        shutdown: &CancellationToken,
    ) -> BuildOutcome {
        let Some(fingerprint) = self.fingerprint(service, variant) else {
            return BuildOutcome::Skipped;
        };

        self.sink.info(
            &service.name,
            format!("building image {} ({})", service.image, variant.as_str()),
        );

        let mut context = BuildAttempt {
            runtime: self.runtime.as_ref(),
            sink: &self.sink,
            service,
            variant,
            fingerprint,
            max_attempts: self.policy.max_attempts(),
        };

        match run_retry_loop(shutdown, &self.policy, &mut context).await {
            RetryOutcome::Succeeded { attempts, .. } => {
                self.sink.success(
                    &service.name,
                    format!("image {} built (attempt {attempts})", service.image),
                );
                BuildOutcome::Built { attempts }
            }
            RetryOutcome::Exhausted { error, attempts } => {
                metrics().record_build_failure(&service.name);
                self.sink.error(
                    &service.name,
                    format!("build failed after {attempts} attempt(s): {error}"),
                );
                BuildOutcome::Failed {
                    attempts,
                    error: error.to_string(),
                }
            }
            RetryOutcome::Cancelled { attempts, .. } => {
                self.sink
                    .warning(&service.name, "build interrupted by stop request");
                BuildOutcome::Cancelled { attempts }
            }
        }
    }
}

struct BuildAttempt<'a> {
    runtime: &'a dyn ContainerRuntime,
    sink: &'a StatusSink,
    service: &'a ServiceDescriptor,
    variant: Variant,
    fingerprint: String,
    max_attempts: u32,
}

#[async_trait]
impl<'a> RetryContext for BuildAttempt<'a> {
    type Output = ();
    type Error = RuntimeError;

    async fn attempt(&mut self, attempt: u32) -> std::result::Result<(), RuntimeError> {
        metrics().record_build_attempt(&self.service.name);
        service_event!(
            debug,
            "build",
            "attempt",
            service = self.service.name,
            attempts = attempt,
            fingerprint = self.fingerprint
        );
        self.runtime
            .build(self.service, self.variant, &self.fingerprint)
            .await
    }

    async fn report_error(&mut self, error: &RuntimeError, attempt: u32, delay: Option<Duration>) {
        if let Some(delay) = delay {
            self.sink.warning(
                &self.service.name,
                format!(
                    "build attempt {attempt}/{} failed: {error}; retrying in {}",
                    self.max_attempts,
                    humantime::format_duration(delay)
                ),
            );
        }
    }
}

/// Watch paths are relative to the working directory, like build contexts.
fn resolve_watch_path(base_dir: &Path, watched: &str) -> PathBuf {
    let path = Path::new(watched);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
