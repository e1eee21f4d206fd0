use super::entry::{Level, LogEntry};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Empty sets match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub levels: BTreeSet<Level>,
    pub components: BTreeSet<String>,
    pub since: Option<DateTime<Utc>>,
}

impl LogFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.levels.insert(level);
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    pub fn since(mut self, timestamp: DateTime<Utc>) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        (self.levels.is_empty() || self.levels.contains(&entry.level))
            && (self.components.is_empty() || self.components.contains(&entry.component))
            && self.since.map_or(true, |since| entry.timestamp >= since)
    }
}

/// A filtered view over a fixed snapshot of entries.
///
/// Filtering happens while iterating; every call to [`LogQuery::iter`] starts from the first
/// entry again and yields matches in emission order.
#[derive(Clone, Debug)]
pub struct LogQuery {
    entries: Arc<[LogEntry]>,
    filter: LogFilter,
}

impl LogQuery {
    pub fn new(entries: impl Into<Arc<[LogEntry]>>, filter: LogFilter) -> Self {
        Self {
            entries: entries.into(),
            filter,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries
            .iter()
            .filter(move |entry| self.filter.matches(entry))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn diagnostics(&self) -> BTreeMap<String, ComponentCounts> {
        diagnostics(self.iter())
    }
}

impl<'a> IntoIterator for &'a LogQuery {
    type Item = &'a LogEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a LogEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComponentCounts {
    pub info: u64,
    pub warnings: u64,
    pub errors: u64,
    pub successes: u64,
}

/// Per-component level counts, used for the diagnostic summary.
pub fn diagnostics<'a>(
    entries: impl IntoIterator<Item = &'a LogEntry>,
) -> BTreeMap<String, ComponentCounts> {
    let mut counts: BTreeMap<String, ComponentCounts> = BTreeMap::new();
    for entry in entries {
        let slot = counts.entry(entry.component.clone()).or_default();
        match entry.level {
            Level::Info => slot.info += 1,
            Level::Warning => slot.warnings += 1,
            Level::Error => slot.errors += 1,
            Level::Success => slot.successes += 1,
        }
    }
    counts
}

/// Reads a persisted stream back into entries. Lines that do not parse are skipped, including
/// torn writes that are not valid UTF-8.
pub fn read_log(path: impl AsRef<Path>) -> io::Result<Vec<LogEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let Ok(text) = std::str::from_utf8(&line) else {
            continue;
        };
        if let Some(entry) = LogEntry::parse_line(text) {
            entries.push(entry);
        }
    }
    Ok(entries)
}
