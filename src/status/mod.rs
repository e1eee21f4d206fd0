mod entry;
mod query;
mod sink;

pub use entry::{Level, LogEntry};
pub use query::{diagnostics, read_log, ComponentCounts, LogFilter, LogQuery};
pub use sink::{StatusSink, MASTER_LOG_FILE};
