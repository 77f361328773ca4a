//! Error types for the locking, queueing, caching and scheduling primitives.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by [`Locker`](crate::Locker) monitor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockerError {
    /// The calling thread does not hold the lock.
    #[error("lock is not held by the current thread")]
    NotHeld,
    /// The calling thread already borrows the locked value.
    #[error("locked value is already borrowed by the current thread")]
    Reentrant,
}

/// Errors produced by [`ActionBuffer`](crate::ActionBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The buffer has been disposed and no longer accepts actions.
    #[error("action buffer `{0}` has been disposed")]
    Disposed(String),
    /// The execution thread could not be started.
    #[error("failed to spawn action buffer thread: {0}")]
    Spawn(String),
}

/// Errors produced by [`TimedCache`](crate::TimedCache).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A duration argument was zero.
    #[error("{name} must be a positive non-zero duration, got {value:?}")]
    InvalidDuration {
        /// Name of the offending argument.
        name: &'static str,
        /// Value that was supplied.
        value: Duration,
    },
    /// The cache has been disposed.
    #[error("timed cache has been disposed")]
    Disposed,
    /// The sweep thread could not be started.
    #[error("failed to spawn cache thread: {0}")]
    Spawn(String),
}

/// Errors produced by [`AffinityTaskScheduler`](crate::core::AffinityTaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The scheduler has been disposed.
    #[error("affinity task scheduler has been disposed")]
    Disposed,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// A worker could not bind the scheduler's affinity.
    #[error("worker affinity binding failed: {0}")]
    Affinity(#[from] AffinityError),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Outcome errors for a single submitted work item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkError {
    /// The work item panicked; the payload message is captured.
    #[error("work item panicked: {0}")]
    Panicked(String),
    /// The work item was discarded before it ran.
    #[error("work item was cancelled before execution")]
    Cancelled,
    /// No result arrived within the requested timeout.
    #[error("timed out waiting for work item")]
    Timeout,
}

/// Errors produced when binding a thread to an execution affinity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    /// The thread is already bound and its binding cannot change.
    #[error("thread is already bound to affinity {0}")]
    AlreadyBound(String),
    /// A caller-supplied binding rejected the thread.
    #[error("affinity binding failed: {0}")]
    Binding(String),
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value that must be positive was zero.
    #[error("{0} must be greater than 0")]
    NotPositive(&'static str),
    /// A value that must be non-empty was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// The minimum thread count exceeds the maximum.
    #[error("min_threads ({min}) must not exceed max_threads ({max})")]
    InvertedLimits {
        /// Configured minimum.
        min: u32,
        /// Configured maximum.
        max: u32,
    },
    /// The configuration document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
