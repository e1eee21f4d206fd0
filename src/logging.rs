//! Helper macros enforcing consistent launchpad log fields.
//!
//! These macros keep `component`, `event` and `service` (and optionally `phase`) fields present
//! on every per-service event emitted by the prober, build gate and orchestrator so downstream
//! parsing can rely on them.

/// Log an event for a service (optionally within a run phase) plus any extra fields.
#[macro_export]
macro_rules! service_event {
    ($level:ident, $component:expr, $event:expr, service = $service:expr, phase = $phase:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            component = $component,
            event = $event,
            service = %$service,
            phase = %$phase,
            $($field = %$value,)*
        )
    };
    ($level:ident, $component:expr, $event:expr, service = $service:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            component = $component,
            event = $event,
            service = %$service,
            $($field = %$value,)*
        )
    };
}
