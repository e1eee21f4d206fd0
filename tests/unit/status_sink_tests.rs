use launchpad::status::{read_log, Level, LogFilter, StatusSink, MASTER_LOG_FILE};

#[test]
fn session_and_master_streams_receive_every_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = StatusSink::open(dir.path());

    sink.info("orchestrator", "starting profile `core`");
    sink.warning("neo4j", "PROBING -> FAILED: not ready after 2m");
    sink.success("postgres", "ready after 120ms (1 check(s))");

    let master = sink.master_path().expect("master stream");
    assert_eq!(master, dir.path().join(MASTER_LOG_FILE));
    let session = sink.session_path().expect("session stream");
    assert!(session
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("session-")));

    let from_master = read_log(&master).expect("master readable");
    let from_session = read_log(&session).expect("session readable");
    assert_eq!(from_master.len(), 3);
    assert_eq!(from_session.len(), 3);
    assert_eq!(from_master[1].level, Level::Warning);
    assert_eq!(from_master[1].component, "neo4j");
}

#[test]
fn master_stream_accumulates_across_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");

    StatusSink::open(dir.path()).info("orchestrator", "first run");
    let second = StatusSink::open(dir.path());
    second.info("orchestrator", "second run");

    let master = read_log(dir.path().join(MASTER_LOG_FILE)).expect("master readable");
    let messages: Vec<&str> = master.iter().map(|entry| entry.message.as_str()).collect();
    assert_eq!(messages, vec!["first run", "second run"]);

    let session = read_log(second.session_path().expect("session")).expect("session readable");
    assert_eq!(session.len(), 1);
}

#[test]
fn queries_filter_lazily_and_restart() {
    let sink = StatusSink::in_memory();
    sink.info("postgres", "ABSENT -> STARTING");
    sink.error("backend", "BUILDING -> FAILED: build failed after 3 attempt(s)");
    sink.info("backend", "ABSENT -> BUILDING");
    sink.success("postgres", "ready");

    let query = sink.query(LogFilter::all().with_component("backend"));
    let first: Vec<_> = query.iter().map(|entry| entry.level).collect();
    let second: Vec<_> = query.iter().map(|entry| entry.level).collect();
    assert_eq!(first, vec![Level::Error, Level::Info]);
    assert_eq!(first, second);

    let errors = sink.query(LogFilter::all().with_level(Level::Error));
    assert_eq!(errors.count(), 1);

    let counts = sink.query(LogFilter::all()).diagnostics();
    assert_eq!(counts["postgres"].info, 1);
    assert_eq!(counts["postgres"].successes, 1);
    assert_eq!(counts["backend"].errors, 1);
}

#[test]
fn since_filter_excludes_older_entries() {
    let sink = StatusSink::in_memory();
    sink.info("orchestrator", "old");
    std::thread::sleep(std::time::Duration::from_millis(5));
    let cutoff = chrono::Utc::now();
    sink.info("orchestrator", "new");

    let recent: Vec<String> = sink
        .query(LogFilter::all().since(cutoff))
        .iter()
        .map(|entry| entry.message.clone())
        .collect();
    assert_eq!(recent, vec!["new".to_string()]);
}

#[test]
fn malformed_lines_are_skipped_when_reading() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.log");
    std::fs::write(
        &path,
        "not a log line\n2026-10-16T09:00:00.000Z [INFO] [orchestrator] phase done\n",
    )
    .expect("write log");

    let entries = read_log(&path).expect("readable");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "phase done");
}

#[test]
fn lines_with_invalid_utf8_are_skipped_when_reading() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(MASTER_LOG_FILE);
    let mut bytes = b"2026-10-16T09:00:00.000Z [INFO] [postgres] ABSENT -> STARTING\n".to_vec();
    bytes.extend_from_slice(b"2026-10-16T09:00:01.000Z [INFO] [backend] torn \xe2\x82\n");
    bytes.extend_from_slice(b"2026-10-16T09:00:02.000Z [SUCCESS] [postgres] ready\n");
    std::fs::write(&path, bytes).expect("write log");

    let entries = read_log(&path).expect("readable despite the torn line");
    let components: Vec<&str> = entries.iter().map(|entry| entry.component.as_str()).collect();
    assert_eq!(components, vec!["postgres", "postgres"]);
    assert_eq!(entries[1].level, Level::Success);
}

#[test]
fn unwritable_log_dir_keeps_entries_in_memory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let not_a_dir = dir.path().join("occupied");
    std::fs::write(&not_a_dir, "regular file").expect("write file");

    let sink = StatusSink::open(&not_a_dir);
    sink.info("orchestrator", "starting profile `minimal`");
    sink.error("project-service", "STARTING -> FAILED: start failed");
    sink.success("postgres", "ready");

    assert_eq!(sink.len(), 3);
    let errors = sink.query(LogFilter::all().with_level(Level::Error));
    assert_eq!(errors.count(), 1);
    assert!(!sink.master_path().expect("stream is still listed").exists());
    assert_eq!(
        std::fs::read_to_string(&not_a_dir).expect("file untouched"),
        "regular file"
    );
}
