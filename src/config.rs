pub mod stack;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub use stack::StackConfig;

/// Process-level settings. Layered from `config/local.*` and `LAUNCHPAD__*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchpadConfig {
    #[serde(default)]
    pub stack_path: Option<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Default for LaunchpadConfig {
    fn default() -> Self {
        Self {
            stack_path: None,
            log_dir: default_log_dir(),
            runtime: RuntimeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    #[serde(default)]
    pub compose_files: Vec<String>,
    #[serde(default)]
    pub dev_compose_files: Vec<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            compose_files: Vec::new(),
            dev_compose_files: Vec::new(),
            project_name: None,
            working_dir: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl RuntimeSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

const fn default_command_timeout_secs() -> u64 {
    900
}

impl LaunchpadConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("LAUNCHPAD").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Loads the declared stack file, falling back to the built-in assessment platform stack.
    pub fn load_stack(&self) -> Result<StackConfig, stack::StackConfigError> {
        match self.stack_path.as_deref() {
            Some(path) if !path.trim().is_empty() => StackConfig::from_path(path),
            _ => StackConfig::builtin(),
        }
    }
}
