#![allow(clippy::result_large_err)]

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod readiness;
pub mod retry;
pub mod runtime;
pub mod status;
pub mod telemetry;
