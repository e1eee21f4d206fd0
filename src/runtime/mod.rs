use crate::config::stack::{ServiceDescriptor, Variant};
use crate::config::RuntimeSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Image label carrying the fingerprint of the inputs an image was built from.
pub const FINGERPRINT_LABEL: &str = "launchpad.fingerprint";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` did not finish within {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },
    #[error("`{command}` exited with code {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Container lifecycle operations the orchestrator drives.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fingerprint recorded on the local image, or `None` when the image is absent or unlabelled.
    async fn artifact_fingerprint(&self, image: &str) -> Result<Option<String>, RuntimeError>;

    async fn build(
        &self,
        service: &ServiceDescriptor,
        variant: Variant,
        fingerprint: &str,
    ) -> Result<(), RuntimeError>;

    async fn start(&self, service: &ServiceDescriptor, variant: Variant) -> Result<(), RuntimeError>;

    async fn stop(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError>;
}

/// `docker build` for images and `docker compose` for container lifecycle.
#[derive(Clone, Debug)]
pub struct ComposeRuntime {
    settings: RuntimeSettings,
    working_dir: PathBuf,
    command_timeout: Duration,
}

impl ComposeRuntime {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self {
            working_dir: settings.working_dir(),
            command_timeout: settings.command_timeout(),
            settings,
        }
    }

    fn compose_args(&self, variant: Variant) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        if let Some(project) = self.settings.project_name.as_deref() {
            args.push("-p".to_string());
            args.push(project.to_string());
        }

        let dev_files: &[String] = match variant {
            Variant::Dev => self.settings.dev_compose_files.as_slice(),
            Variant::Release => &[],
        };
        for file in self.settings.compose_files.iter().chain(dev_files) {
            args.push("-f".to_string());
            args.push(file.clone());
        }
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, RuntimeError> {
        let rendered = format!("{} {}", self.settings.docker_binary, args.join(" "));
        debug!(component = "runtime", command = %rendered, "running container command");

        let child = Command::new(&self.settings.docker_binary)
            .args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let output = timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::TimedOut {
                command: rendered.clone(),
                timeout_secs: self.command_timeout.as_secs(),
            })?
            .map_err(|source| RuntimeError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::Failed {
                command: rendered,
                exit_code: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn artifact_fingerprint(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        let format = format!("{{{{ index .Config.Labels \"{FINGERPRINT_LABEL}\" }}}}");
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            format,
            image.to_string(),
        ];

        match self.run(args).await {
            Ok(output) => Ok(parse_label(&String::from_utf8_lossy(&output.stdout))),
            // A missing image is reported as a failed inspect.
            Err(RuntimeError::Failed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn build(
        &self,
        service: &ServiceDescriptor,
        variant: Variant,
        fingerprint: &str,
    ) -> Result<(), RuntimeError> {
        let Some(build) = service.build.as_ref() else {
            return Ok(());
        };

        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            service.image.clone(),
            "--label".to_string(),
            format!("{FINGERPRINT_LABEL}={fingerprint}"),
        ];
        if let Some(dockerfile) = build.dockerfile.as_deref() {
            args.push("--file".to_string());
            args.push(dockerfile.to_string());
        }
        if let Some(target) = build.target_for(variant) {
            args.push("--target".to_string());
            args.push(target.to_string());
        }
        for (key, value) in &build.args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(build.context.clone());

        self.run(args).await.map(drop)
    }

    async fn start(&self, service: &ServiceDescriptor, variant: Variant) -> Result<(), RuntimeError> {
        let mut args = self.compose_args(variant);
        args.extend([
            "up".to_string(),
            "--detach".to_string(),
            "--no-build".to_string(),
            service.name.clone(),
        ]);
        self.run(args).await.map(drop)
    }

    async fn stop(&self, service: &ServiceDescriptor) -> Result<(), RuntimeError> {
        let mut args = self.compose_args(Variant::Release);
        args.extend(["stop".to_string(), service.name.clone()]);
        self.run(args).await.map(drop)
    }
}

fn parse_label(stdout: &str) -> Option<String> {
    let value = stdout.trim();
    if value.is_empty() || value == "<no value>" {
        None
    } else {
        Some(value.to_string())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}
