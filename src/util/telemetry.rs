//! Telemetry helpers for structured logging and tracing.
//!
//! Worker, buffer and cache threads are named, so the default subscriber
//! prints thread names alongside each event.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

/// Subscriber for test binaries: output is captured per test by the harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}
