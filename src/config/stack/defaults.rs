use super::services::Tier;
use humantime::parse_duration;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PROFILE: &str = "core";

#[derive(Debug, Clone, PartialEq)]
pub struct StackDefaults {
    pub default_profile: String,
    pub probe_interval: Duration,
    pub infrastructure_timeout: Duration,
    pub application_timeout: Duration,
    pub build: BuildPolicy,
}

impl Default for StackDefaults {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            probe_interval: Duration::from_secs(5),
            infrastructure_timeout: Duration::from_secs(120),
            application_timeout: Duration::from_secs(60),
            build: BuildPolicy::default(),
        }
    }
}

impl StackDefaults {
    /// Readiness budget for a tier; heavier infrastructure services get the longer one.
    pub fn readiness_timeout(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Infrastructure => self.infrastructure_timeout,
            Tier::Application => self.application_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub jitter: JitterMode,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            jitter: JitterMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterMode {
    #[default]
    None,
    Full,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawDefaults {
    #[serde(default)]
    pub(crate) default_profile: Option<String>,
    #[serde(default)]
    pub(crate) probe_interval: Option<String>,
    #[serde(default)]
    pub(crate) infrastructure_timeout: Option<String>,
    #[serde(default)]
    pub(crate) application_timeout: Option<String>,
    #[serde(default)]
    pub(crate) build: Option<RawBuildPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawBuildPolicy {
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    #[serde(default)]
    pub(crate) backoff: Option<String>,
    #[serde(default)]
    pub(crate) jitter: Option<String>,
}

pub(crate) fn parse_defaults(raw: Option<RawDefaults>, errors: &mut Vec<String>) -> StackDefaults {
    let raw = raw.unwrap_or_default();
    let mut defaults = StackDefaults::default();

    if let Some(profile) = raw.default_profile {
        let trimmed = profile.trim();
        if trimmed.is_empty() {
            errors.push("defaults.default_profile must be a non-empty string".to_string());
        } else {
            defaults.default_profile = trimmed.to_string();
        }
    }

    if let Some(interval) =
        parse_duration_value("defaults.probe_interval", raw.probe_interval, errors)
            .and_then(|dur| ensure_positive_duration(dur, "defaults.probe_interval", errors))
    {
        defaults.probe_interval = interval;
    }

    if let Some(timeout) = parse_duration_value(
        "defaults.infrastructure_timeout",
        raw.infrastructure_timeout,
        errors,
    )
    .and_then(|dur| ensure_positive_duration(dur, "defaults.infrastructure_timeout", errors))
    {
        defaults.infrastructure_timeout = timeout;
    }

    if let Some(timeout) =
        parse_duration_value("defaults.application_timeout", raw.application_timeout, errors)
            .and_then(|dur| ensure_positive_duration(dur, "defaults.application_timeout", errors))
    {
        defaults.application_timeout = timeout;
    }

    if let Some(build) = raw.build {
        defaults.build = parse_build_policy(build, errors);
    }

    defaults
}

fn parse_build_policy(raw: RawBuildPolicy, errors: &mut Vec<String>) -> BuildPolicy {
    let mut policy = BuildPolicy::default();

    match raw.max_attempts {
        Some(0) => errors.push("defaults.build.max_attempts must be greater than zero".to_string()),
        Some(attempts) => policy.max_attempts = attempts,
        None => {}
    }

    // A zero backoff is allowed: it retries immediately.
    if let Some(backoff) = parse_duration_value("defaults.build.backoff", raw.backoff, errors) {
        policy.backoff = backoff;
    }

    if let Some(jitter) = raw.jitter {
        let trimmed = jitter.trim();
        match parse_jitter_mode(trimmed) {
            Some(mode) => policy.jitter = mode,
            None => errors.push(format!(
                "defaults.build.jitter must be one of `none` or `full` (got `{trimmed}`)"
            )),
        }
    }

    policy
}

fn parse_jitter_mode(value: &str) -> Option<JitterMode> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Some(JitterMode::None),
        "full" => Some(JitterMode::Full),
        _ => None,
    }
}

pub(crate) fn parse_duration_value(
    field_label: &str,
    raw: Option<String>,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    let raw_value = raw?;

    let trimmed = raw_value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field_label} must be a non-empty duration string"));
        return None;
    }

    match parse_duration(trimmed) {
        Ok(duration) => Some(duration),
        Err(_) => {
            errors.push(format!(
                "{field_label} must be a valid duration (got `{trimmed}`)"
            ));
            None
        }
    }
}

pub(crate) fn ensure_positive_duration(
    duration: Duration,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<Duration> {
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        None
    } else {
        Some(duration)
    }
}
