use super::defaults::{ensure_positive_duration, parse_duration_value};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Coarse startup bucket. Every infrastructure service settles before any application starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Infrastructure,
    Application,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Infrastructure => "infrastructure",
            Tier::Application => "application",
        }
    }

    fn from_raw(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "infrastructure" | "infra" => Some(Tier::Infrastructure),
            "application" | "app" => Some(Tier::Application),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build/runtime flavour selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    #[default]
    Release,
    Dev,
}

impl Variant {
    pub fn from_dev_mode(dev_mode: bool) -> Self {
        if dev_mode {
            Variant::Dev
        } else {
            Variant::Release
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Release => "release",
            Variant::Dev => "dev",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub tier: Tier,
    pub depends_on: Vec<String>,
    pub image: String,
    pub build: Option<BuildSpec>,
    pub readiness: ReadinessSpec,
    pub ports: Vec<PortMapping>,
}

impl ServiceDescriptor {
    pub fn needs_image_build(&self) -> bool {
        self.build.is_some()
    }

    /// Host-side addresses an operator can reach once the service is ready.
    pub fn access_points(&self) -> Vec<String> {
        self.ports.iter().map(PortMapping::access_point).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: Option<String>,
    pub target: Option<String>,
    pub dev_target: Option<String>,
    pub args: BTreeMap<String, String>,
    pub watch: Vec<String>,
}

impl BuildSpec {
    pub fn target_for(&self, variant: Variant) -> Option<&str> {
        match variant {
            Variant::Dev => self.dev_target.as_deref().or(self.target.as_deref()),
            Variant::Release => self.target.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessSpec {
    pub check: ReadinessCheck,
    pub timeout: Option<Duration>,
    pub interval: Option<Duration>,
}

impl Default for ReadinessSpec {
    fn default() -> Self {
        Self {
            check: ReadinessCheck::None,
            timeout: None,
            interval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessCheck {
    None,
    Tcp { host: String, port: u16 },
    Http { url: String, expect_status: Vec<u16> },
}

impl ReadinessCheck {
    /// Success predicate for HTTP checks. An empty expectation list accepts any 2xx.
    pub fn accepts_status(&self, status: u16) -> bool {
        match self {
            ReadinessCheck::Http { expect_status, .. } if !expect_status.is_empty() => {
                expect_status.contains(&status)
            }
            _ => (200..300).contains(&status),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ReadinessCheck::None => "none".to_string(),
            ReadinessCheck::Tcp { host, port } => format!("tcp://{host}:{port}"),
            ReadinessCheck::Http { url, .. } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProtocol {
    Http,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub protocol: PortProtocol,
    pub path: Option<String>,
}

impl PortMapping {
    pub fn access_point(&self) -> String {
        match self.protocol {
            PortProtocol::Http => format!(
                "http://localhost:{}{}",
                self.host,
                self.path.as_deref().unwrap_or("")
            ),
            PortProtocol::Tcp => format!("localhost:{}", self.host),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default)]
    readiness: Option<RawReadiness>,
    #[serde(default)]
    ports: Vec<RawPort>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBuild {
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    dockerfile: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    dev_target: Option<String>,
    #[serde(default)]
    args: BTreeMap<String, String>,
    #[serde(default)]
    watch: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReadiness {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expect_status: Vec<u16>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Short(String),
    Full {
        host: u16,
        container: u16,
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

pub(crate) fn parse_services(
    raw: Vec<RawService>,
    errors: &mut Vec<String>,
) -> Vec<ServiceDescriptor> {
    let mut seen = BTreeSet::new();
    let mut services = Vec::with_capacity(raw.len());

    for (index, raw_service) in raw.into_iter().enumerate() {
        let name = match raw_service.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                errors.push(format!("services[{index}].name must be a non-empty string"));
                continue;
            }
        };

        if !seen.insert(name.clone()) {
            errors.push(format!("service `{name}` is declared more than once"));
            continue;
        }

        if let Some(service) = parse_service(&name, raw_service, errors) {
            services.push(service);
        }
    }

    services
}

fn parse_service(
    name: &str,
    raw: RawService,
    errors: &mut Vec<String>,
) -> Option<ServiceDescriptor> {
    let context = format!("service `{name}`");

    let tier = match raw.tier.as_deref().map(str::trim) {
        Some(value) => match Tier::from_raw(value) {
            Some(tier) => tier,
            None => {
                errors.push(format!(
                    "{context}: tier must be `infrastructure` or `application` (got `{value}`)"
                ));
                return None;
            }
        },
        None => {
            errors.push(format!("{context}: tier is required"));
            return None;
        }
    };

    let depends_on = dedupe_preserving_order(raw.depends_on);
    let build = raw.build.map(|build| parse_build(&context, build, errors));

    let image = match raw.image.as_deref().map(str::trim) {
        Some(image) if !image.is_empty() => image.to_string(),
        _ if build.is_some() => format!("launchpad/{name}:local"),
        _ => {
            errors.push(format!(
                "{context}: either `image` or `build` must be provided"
            ));
            return None;
        }
    };

    let readiness = raw
        .readiness
        .map(|readiness| parse_readiness(&context, readiness, errors))
        .unwrap_or_default();

    let ports = raw
        .ports
        .into_iter()
        .filter_map(|port| parse_port(&context, port, errors))
        .collect();

    Some(ServiceDescriptor {
        name: name.to_string(),
        tier,
        depends_on,
        image,
        build,
        readiness,
        ports,
    })
}

fn parse_build(context: &str, raw: RawBuild, errors: &mut Vec<String>) -> BuildSpec {
    let build_context = match raw.context.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        Some(_) => {
            errors.push(format!("{context}: build.context must not be empty"));
            ".".to_string()
        }
        None => ".".to_string(),
    };

    BuildSpec {
        context: build_context,
        dockerfile: non_empty(raw.dockerfile),
        target: non_empty(raw.target),
        dev_target: non_empty(raw.dev_target),
        args: raw.args,
        watch: dedupe_preserving_order(raw.watch),
    }
}

fn parse_readiness(context: &str, raw: RawReadiness, errors: &mut Vec<String>) -> ReadinessSpec {
    let timeout = parse_duration_value(
        &format!("{context}: readiness.timeout"),
        raw.timeout,
        errors,
    )
    .and_then(|dur| ensure_positive_duration(dur, &format!("{context}: readiness.timeout"), errors));
    let interval = parse_duration_value(
        &format!("{context}: readiness.interval"),
        raw.interval,
        errors,
    )
    .and_then(|dur| {
        ensure_positive_duration(dur, &format!("{context}: readiness.interval"), errors)
    });

    let check = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "none" => ReadinessCheck::None,
        "tcp" => {
            let host = non_empty(raw.host).unwrap_or_else(|| "localhost".to_string());
            match raw.port {
                Some(port) if port > 0 => ReadinessCheck::Tcp { host, port },
                _ => {
                    errors.push(format!(
                        "{context}: tcp readiness requires a non-zero `port`"
                    ));
                    ReadinessCheck::None
                }
            }
        }
        "http" => match non_empty(raw.url) {
            Some(url) => {
                if let Err(err) = url::Url::parse(&url) {
                    errors.push(format!(
                        "{context}: readiness.url `{url}` is not a valid URL ({err})"
                    ));
                }
                for status in &raw.expect_status {
                    if !(100..=599).contains(status) {
                        errors.push(format!(
                            "{context}: readiness.expect_status contains invalid status {status}"
                        ));
                    }
                }
                ReadinessCheck::Http {
                    url,
                    expect_status: raw.expect_status,
                }
            }
            None => {
                errors.push(format!("{context}: http readiness requires a `url`"));
                ReadinessCheck::None
            }
        },
        other => {
            errors.push(format!(
                "{context}: readiness.type must be one of `none`, `tcp`, or `http` (got `{other}`)"
            ));
            ReadinessCheck::None
        }
    };

    ReadinessSpec {
        check,
        timeout,
        interval,
    }
}

fn parse_port(context: &str, raw: RawPort, errors: &mut Vec<String>) -> Option<PortMapping> {
    let mapping = match raw {
        RawPort::Short(text) => {
            let trimmed = text.trim();
            let parsed = trimmed
                .split_once(':')
                .and_then(|(host, container)| {
                    Some((host.trim().parse::<u16>().ok()?, container.trim().parse::<u16>().ok()?))
                });
            match parsed {
                Some((host, container)) => PortMapping {
                    host,
                    container,
                    protocol: PortProtocol::Tcp,
                    path: None,
                },
                None => {
                    errors.push(format!(
                        "{context}: port `{trimmed}` must use the `HOST:CONTAINER` form"
                    ));
                    return None;
                }
            }
        }
        RawPort::Full {
            host,
            container,
            protocol,
            path,
        } => {
            let protocol = match protocol.as_deref().map(str::trim) {
                None | Some("tcp") => PortProtocol::Tcp,
                Some("http") => PortProtocol::Http,
                Some(other) => {
                    errors.push(format!(
                        "{context}: port protocol must be `tcp` or `http` (got `{other}`)"
                    ));
                    return None;
                }
            };
            PortMapping {
                host,
                container,
                protocol,
                path: non_empty(path),
            }
        }
    };

    if mapping.host == 0 || mapping.container == 0 {
        errors.push(format!("{context}: ports must be non-zero"));
        return None;
    }

    Some(mapping)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_string())
        .filter(|inner| !inner.is_empty())
}

pub(crate) fn dedupe_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}
