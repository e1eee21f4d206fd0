use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide counters for build and probe activity, keyed by service.
#[derive(Default)]
pub struct MetricsCollector {
    services: Mutex<BTreeMap<String, ServiceCounters>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceCounters {
    pub build_attempts: u64,
    pub build_failures: u64,
    pub builds_skipped: u64,
    pub probe_attempts: u64,
    pub probe_timeouts: u64,
    pub last_ready_ms: Option<u64>,
    pub stop_errors: u64,
}

pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}

impl MetricsCollector {
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::default)
    }

    pub fn record_build_attempt(&self, service: &str) {
        self.update(service, |counters| counters.build_attempts += 1);
    }

    pub fn record_build_failure(&self, service: &str) {
        self.update(service, |counters| counters.build_failures += 1);
    }

    pub fn record_build_skipped(&self, service: &str) {
        self.update(service, |counters| counters.builds_skipped += 1);
    }

    pub fn record_probe_ready(&self, service: &str, attempts: u32, elapsed: Duration) {
        let millis = std::cmp::min(elapsed.as_millis(), u128::from(u64::MAX)) as u64;
        self.update(service, |counters| {
            counters.probe_attempts += u64::from(attempts);
            counters.last_ready_ms = Some(millis);
        });
    }

    pub fn record_probe_timeout(&self, service: &str, attempts: u32) {
        self.update(service, |counters| {
            counters.probe_attempts += u64::from(attempts);
            counters.probe_timeouts += 1;
        });
    }

    pub fn record_stop_error(&self, service: &str) {
        self.update(service, |counters| counters.stop_errors += 1);
    }

    pub fn service(&self, service: &str) -> ServiceCounters {
        let guard = self.services.lock().expect("metrics registry poisoned");
        guard.get(service).cloned().unwrap_or_default()
    }

    fn update(&self, service: &str, apply: impl FnOnce(&mut ServiceCounters)) {
        let mut guard = self.services.lock().expect("metrics registry poisoned");
        apply(guard.entry(service.to_string()).or_default());
    }
}
