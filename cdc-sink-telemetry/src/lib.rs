//! Logging and metrics bootstrap shared by binaries and tests.

pub mod metrics;
pub mod tracing;
