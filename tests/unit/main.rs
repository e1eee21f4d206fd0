#[path = "../support/mod.rs"]
mod support;

mod build_gate_tests;
mod config_stack_tests;
mod readiness_graph_tests;
mod readiness_probe_tests;
mod readiness_state_tests;
mod status_sink_tests;
