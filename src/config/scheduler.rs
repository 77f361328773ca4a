//! Configuration for the affinity worker pool.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ThreadLimits;
use crate::core::ConfigError;

/// Configuration for an [`AffinityTaskScheduler`](crate::core::AffinityTaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker-count bounds; `min_threads` workers are started.
    #[serde(flatten)]
    pub limits: ThreadLimits,
    /// Worker threads are named `{prefix}#{index}`.
    pub thread_name_prefix: String,
    /// How long `dispose` waits for workers before detaching them.
    pub shutdown_grace_ms: u64,
    /// Optional worker stack size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            limits: ThreadLimits::default(),
            thread_name_prefix: "affinity-worker".to_string(),
            shutdown_grace_ms: 2_000,
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Configuration with default limits and naming.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: ThreadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Use a fixed pool of `threads` workers.
    #[must_use]
    pub const fn with_worker_count(mut self, threads: u32) -> Self {
        self.limits = ThreadLimits::fixed(threads);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate limits and naming.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Empty("thread_name_prefix"));
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::NotPositive("stack_size"));
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed input, or a validation error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
