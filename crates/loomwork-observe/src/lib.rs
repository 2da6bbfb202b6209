//! Tracing/OpenTelemetry setup shared by every Loomwork binary.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
