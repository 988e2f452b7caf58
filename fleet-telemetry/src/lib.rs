//! Telemetry for the fleet services: tracing subscriber setup and the Prometheus recorder.

pub mod metrics;
pub mod tracing;
