//! Failure sinks.
//!
//! Work executed on background threads (buffered actions, cache sweeps and
//! event handlers) must never take its owning thread down. Such failures are
//! captured and handed to a [`FailureSink`] instead of being dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

/// A failure captured inside a background component.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Component that caught the failure (buffer name, `timed-cache`, ...).
    pub component: String,
    /// What the component was doing.
    pub message: String,
    /// Rendered error or panic payload.
    pub error: String,
    /// When the failure was captured.
    pub occurred_at: SystemTime,
}

impl Failure {
    /// Build a failure record stamped with the current time.
    pub fn new(
        component: impl Into<String>,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
            error: error.into(),
            occurred_at: SystemTime::now(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.message, self.error)
    }
}

/// Receiver for contained failures.
///
/// Implementations must not panic; a sink is called from the thread that
/// caught the failure.
pub trait FailureSink: Send + Sync {
    /// Record a failure.
    fn report(&self, failure: &Failure);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn FailureSink>;

/// Default sink: emits a `tracing` warning per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, failure: &Failure) {
        tracing::warn!(
            component = %failure.component,
            error = %failure.error,
            "{}",
            failure.message
        );
    }
}

/// Sink that discards every failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FailureSink for NullSink {
    fn report(&self, _failure: &Failure) {}
}

/// In-memory sink with a bounded buffer, for tests and diagnostics.
#[derive(Debug)]
pub struct InMemorySink {
    failures: Mutex<VecDeque<Failure>>,
    max_failures: usize,
}

impl InMemorySink {
    /// Create a new in-memory sink keeping at most `max_failures` records.
    #[must_use]
    pub fn new(max_failures: usize) -> Self {
        Self {
            failures: Mutex::new(VecDeque::with_capacity(max_failures)),
            max_failures,
        }
    }

    /// Snapshot of stored failures, oldest first.
    #[must_use]
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().iter().cloned().collect()
    }

    /// Number of stored failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Whether no failure has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

impl FailureSink for InMemorySink {
    fn report(&self, failure: &Failure) {
        if self.max_failures == 0 {
            return;
        }
        let mut failures = self.failures.lock();
        if failures.len() >= self.max_failures {
            failures.pop_front();
        }
        failures.push_back(failure.clone());
    }
}

/// The sink used when a component is not given one.
#[must_use]
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
