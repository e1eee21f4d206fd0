use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Fields hoisted to the front of every line, in this order, when an event records them.
const LEADING_FIELDS: [&str; 3] = ["event", "service", "phase"];

pub fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("launchpad=info,info"));

    // WARN and ERROR go to stderr, everything else to stdout.
    let writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .or_else(std::io::stdout);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(LaunchpadFormat)
        .fmt_fields(DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// One `key=value` line per event:
/// `ts level component [event] [service] [phase] [span] msg <remaining fields sorted>`.
struct LaunchpadFormat;

impl<S, N> FormatEvent<S, N> for LaunchpadFormat
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let component = visitor
            .take("component")
            .unwrap_or_else(|| metadata.target().to_string());
        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut line = String::new();
        push_field(
            &mut line,
            "ts",
            &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "component", &component);
        for key in LEADING_FIELDS {
            if let Some(value) = visitor.take(key) {
                push_field(&mut line, key, &value);
            }
        }
        if let Some(span) = ctx.lookup_current() {
            let path: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
            push_field(&mut line, "span", &path.join("."));
        }
        push_field(&mut line, "msg", &message);

        visitor.fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
        for (key, value) in &visitor.fields {
            push_field(&mut line, key, value);
        }

        writeln!(writer, "{line}")
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl FieldVisitor {
    fn take(&mut self, key: &str) -> Option<String> {
        let index = self.fields.iter().position(|(name, _)| *name == key)?;
        Some(self.fields.remove(index).1)
    }

    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            name => self.fields.push((name, value)),
        }
    }
}

// Numbers and bools fall through to `record_debug`, whose output is already their plain form.
impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{value:?}"));
    }
}

/// Bare values stay bare; anything that would break `key=value` splitting is Debug-quoted.
fn encode_value(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && !"\"\\=[]{},".contains(c));
    if bare {
        value.to_string()
    } else {
        format!("{value:?}")
    }
}

fn push_field(line: &mut String, key: &str, value: &str) {
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(key);
    line.push('=');
    line.push_str(&encode_value(value));
}
