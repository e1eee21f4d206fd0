use super::entry::{Level, LogEntry};
use super::query::{LogFilter, LogQuery};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const MASTER_LOG_FILE: &str = "launchpad-master.log";

/// Append-only event log shared by the orchestrator, the console, and two file streams.
///
/// Persisting is best effort: a stream that fails to open or write is disabled after one
/// warning and the in-memory copy keeps every entry.
#[derive(Clone)]
pub struct StatusSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    entries: Mutex<Vec<LogEntry>>,
    streams: Mutex<Vec<LogStream>>,
}

struct LogStream {
    name: &'static str,
    path: PathBuf,
    file: Option<File>,
}

impl StatusSink {
    pub fn in_memory() -> Self {
        Self::with_streams(Vec::new())
    }

    /// Opens a fresh session stream and the cumulative master stream under `log_dir`.
    pub fn open(log_dir: impl AsRef<Path>) -> Self {
        let log_dir = log_dir.as_ref();
        if let Err(err) = fs::create_dir_all(log_dir) {
            tracing::warn!(
                component = "status",
                path = %log_dir.display(),
                error = %err,
                "log directory unavailable; entries will not be persisted"
            );
        }

        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let session_path = log_dir.join(format!("session-{stamp}-{}.log", short_run_id()));
        let master_path = log_dir.join(MASTER_LOG_FILE);

        Self::with_streams(vec![
            LogStream::open("session", session_path),
            LogStream::open("master", master_path),
        ])
    }

    fn with_streams(streams: Vec<LogStream>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                entries: Mutex::new(Vec::new()),
                streams: Mutex::new(streams),
            }),
        }
    }

    pub fn append(
        &self,
        level: Level,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> LogEntry {
        // The entries lock is held across the file writes so every stream sees emission order.
        let mut entries = lock(&self.inner.entries);
        let entry = LogEntry::new(level, component, message);
        emit_console(&entry);

        let line = entry.to_line();
        for stream in lock(&self.inner.streams).iter_mut() {
            stream.write_line(&line);
        }

        entries.push(entry.clone());
        entry
    }

    pub fn info(&self, component: &str, message: impl Into<String>) -> LogEntry {
        self.append(Level::Info, component, message)
    }

    pub fn warning(&self, component: &str, message: impl Into<String>) -> LogEntry {
        self.append(Level::Warning, component, message)
    }

    pub fn error(&self, component: &str, message: impl Into<String>) -> LogEntry {
        self.append(Level::Error, component, message)
    }

    pub fn success(&self, component: &str, message: impl Into<String>) -> LogEntry {
        self.append(Level::Success, component, message)
    }

    /// Copy of every entry appended so far, in emission order.
    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.inner.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn query(&self, filter: LogFilter) -> LogQuery {
        LogQuery::new(self.entries(), filter)
    }

    pub fn stream_path(&self, name: &str) -> Option<PathBuf> {
        lock(&self.inner.streams)
            .iter()
            .find(|stream| stream.name == name)
            .map(|stream| stream.path.clone())
    }

    pub fn session_path(&self) -> Option<PathBuf> {
        self.stream_path("session")
    }

    pub fn master_path(&self) -> Option<PathBuf> {
        self.stream_path("master")
    }
}

impl LogStream {
    fn open(name: &'static str, path: PathBuf) -> Self {
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(
                    component = "status",
                    stream = name,
                    path = %path.display(),
                    error = %err,
                    "failed to open log stream"
                );
                None
            }
        };

        Self { name, path, file }
    }

    fn write_line(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let result = writeln!(file, "{line}").and_then(|_| file.flush());
        if let Err(err) = result {
            tracing::warn!(
                component = "status",
                stream = self.name,
                path = %self.path.display(),
                error = %err,
                "log stream write failed; disabling stream"
            );
            self.file = None;
        }
    }
}

fn emit_console(entry: &LogEntry) {
    let component = entry.component.as_str();
    match entry.level {
        Level::Info => tracing::info!(component, "{}", entry.message),
        Level::Success => tracing::info!(component, outcome = "success", "{}", entry.message),
        Level::Warning => tracing::warn!(component, "{}", entry.message),
        Level::Error => tracing::error!(component, "{}", entry.message),
    }
}

fn short_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_disables_the_stream() {
        let mut stream = LogStream::open("master", PathBuf::from("/dev/full"));
        assert!(stream.file.is_some(), "/dev/full opens for append");

        stream.write_line("2026-10-16T09:00:00.000Z [INFO] [orchestrator] lost");
        assert!(stream.file.is_none());

        stream.write_line("2026-10-16T09:00:01.000Z [INFO] [orchestrator] ignored");
        assert!(stream.file.is_none());
    }
}
