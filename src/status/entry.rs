use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "SUCCESS" => Ok(Level::Success),
            other => Err(format!(
                "log level must be one of INFO, WARNING, ERROR, SUCCESS (got `{other}`)"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub component: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: Level, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: sanitise_component(&component.into()),
            message: single_line(&message.into()),
        }
    }

    /// Persisted form: `<rfc3339> [<LEVEL>] [<component>] <message>`.
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] [{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            self.component,
            self.message
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let (timestamp, rest) = line.trim_end().split_once(' ')?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .ok()?
            .with_timezone(&Utc);

        let rest = rest.strip_prefix('[')?;
        let (level, rest) = rest.split_once("] [")?;
        let level = level.parse().ok()?;
        let (component, message) = match rest.split_once("] ") {
            Some(parts) => parts,
            None => (rest.strip_suffix(']')?, ""),
        };

        Some(Self {
            timestamp,
            level,
            component: component.to_string(),
            message: message.to_string(),
        })
    }
}

fn sanitise_component(component: &str) -> String {
    let cleaned: String = component
        .trim()
        .chars()
        .map(|ch| if ch == '[' || ch == ']' || ch.is_whitespace() { '-' } else { ch })
        .collect();
    if cleaned.is_empty() {
        "launchpad".to_string()
    } else {
        cleaned
    }
}

fn single_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join(" | ")
}
