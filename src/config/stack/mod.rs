mod defaults;
mod profiles;
mod services;

use serde::de::Error as _;
use serde::Deserialize;
use serde_yaml::{self, Value as YamlValue};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub use defaults::{BuildPolicy, JitterMode, StackDefaults, DEFAULT_PROFILE};
pub use profiles::ProfileDefinition;
pub use services::{
    BuildSpec, PortMapping, PortProtocol, ReadinessCheck, ReadinessSpec, ServiceDescriptor, Tier,
    Variant,
};

/// Declaration of the assessment platform stack shipped with the binary.
const BUILTIN_STACK: &str = include_str!("default_stack.yaml");

const TOP_LEVEL_FIELDS: &str = "api_version, defaults, services, profiles";

/// Static service and profile declaration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub api_version: String,
    pub defaults: StackDefaults,
    pub services: Vec<ServiceDescriptor>,
    pub profiles: Vec<ProfileDefinition>,
}

impl StackConfig {
    pub fn builtin() -> Result<Self, StackConfigError> {
        Self::from_yaml_str(BUILTIN_STACK)
    }

    pub fn from_reader(mut reader: impl Read) -> Result<Self, StackConfigError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StackConfigError> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileDefinition> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    fn from_yaml_str(contents: &str) -> Result<Self, StackConfigError> {
        let mut documents = serde_yaml::Deserializer::from_str(contents);
        let mut parsed = None;
        let mut extra_errors = Vec::new();

        for (index, document) in documents.by_ref().enumerate() {
            if index == 0 {
                parsed = Some(RawStackFile::deserialize(document)?);
            } else {
                let _: YamlValue = YamlValue::deserialize(document)?;
                extra_errors
                    .push("error[root]: multiple YAML documents are not supported".to_string());
                break;
            }
        }

        let Some(raw) = parsed else {
            let err = serde_yaml::Error::custom("stack config must contain exactly one YAML document");
            return Err(StackConfigError::Parse(err));
        };

        Self::from_raw(raw, extra_errors).map_err(StackConfigError::Invalid)
    }

    fn from_raw(raw: RawStackFile, mut errors: Vec<String>) -> Result<Self, StackValidationError> {
        let RawStackFile {
            api_version,
            defaults: raw_defaults,
            services: raw_services,
            profiles: raw_profiles,
            extra_fields,
        } = raw;

        for key in extra_fields.keys() {
            errors.push(format!(
                "error[root]: unknown top-level key \"{key}\" (expected one of {TOP_LEVEL_FIELDS})"
            ));
        }

        let api_version = parse_api_version(api_version, &mut errors);
        let defaults = defaults::parse_defaults(raw_defaults, &mut errors);
        let services = services::parse_services(raw_services, &mut errors);
        let profiles = profiles::parse_profiles(raw_profiles, &mut errors);

        if services.is_empty() {
            errors.push("error[root]: at least one service must be declared".to_string());
        }
        validate_host_ports(&services, &mut errors);
        validate_tier_dependencies(&services, &mut errors);

        if errors.is_empty() {
            Ok(Self {
                api_version,
                defaults,
                services,
                profiles,
            })
        } else {
            Err(StackValidationError::new(errors))
        }
    }
}

fn parse_api_version(raw: Option<String>, errors: &mut Vec<String>) -> String {
    match raw.as_deref().map(str::trim) {
        None => {
            errors.push("error[root]: api_version is required (supported versions: v1)".to_string());
            "v1".to_string()
        }
        Some(value) if value.eq_ignore_ascii_case("v1") => "v1".to_string(),
        Some(value) => {
            errors.push(format!(
                "api_version `{value}` is not supported (supported versions: v1)"
            ));
            value.to_string()
        }
    }
}

fn validate_host_ports(services: &[ServiceDescriptor], errors: &mut Vec<String>) {
    let mut owners: HashMap<u16, &str> = HashMap::new();
    for service in services {
        for port in &service.ports {
            if let Some(owner) = owners.insert(port.host, &service.name) {
                if owner != service.name {
                    errors.push(format!(
                        "host port {} is bound by both `{owner}` and `{}`",
                        port.host, service.name
                    ));
                }
            }
        }
    }
}

/// Infrastructure settles before any application starts, so it cannot wait on one.
/// Undeclared dependencies are left for profile resolution to report.
fn validate_tier_dependencies(services: &[ServiceDescriptor], errors: &mut Vec<String>) {
    let tiers: HashMap<&str, Tier> = services
        .iter()
        .map(|service| (service.name.as_str(), service.tier))
        .collect();

    for service in services.iter().filter(|s| s.tier == Tier::Infrastructure) {
        for dependency in &service.depends_on {
            if tiers.get(dependency.as_str()) == Some(&Tier::Application) {
                errors.push(format!(
                    "infrastructure service `{}` cannot depend on application service `{dependency}`",
                    service.name
                ));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStackFile {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    defaults: Option<defaults::RawDefaults>,
    #[serde(default)]
    services: Vec<services::RawService>,
    #[serde(default)]
    profiles: Vec<profiles::RawProfile>,
    #[serde(default)]
    #[serde(flatten)]
    extra_fields: BTreeMap<String, YamlValue>,
}

#[derive(Debug, Error)]
pub enum StackConfigError {
    #[error("failed to read stack config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse stack config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(StackValidationError),
}

#[derive(Debug, Error)]
#[error("stack config validation failed:\n{rendered}")]
pub struct StackValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl StackValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}
