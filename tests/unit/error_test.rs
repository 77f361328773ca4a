//! Tests for error types

use affinity_sync::core::{
    AffinityError, BufferError, CacheError, ConfigError, LockerError, SchedulerError, WorkError,
};
use std::time::Duration;

#[test]
fn test_locker_errors() {
    assert_eq!(
        LockerError::NotHeld.to_string(),
        "lock is not held by the current thread"
    );
    assert_eq!(
        LockerError::Reentrant.to_string(),
        "locked value is already borrowed by the current thread"
    );
}

#[test]
fn test_buffer_disposed_error() {
    let err = BufferError::Disposed("audit".to_string());
    assert_eq!(format!("{err}"), "action buffer `audit` has been disposed");
}

#[test]
fn test_cache_invalid_duration_error() {
    let err = CacheError::InvalidDuration {
        name: "expiration",
        value: Duration::ZERO,
    };
    assert_eq!(
        err.to_string(),
        "expiration must be a positive non-zero duration, got 0ns"
    );
}

#[test]
fn test_scheduler_error_from_config() {
    let err: SchedulerError = ConfigError::InvertedLimits { min: 4, max: 2 }.into();
    assert_eq!(
        err.to_string(),
        "invalid configuration: min_threads (4) must not exceed max_threads (2)"
    );
}

#[test]
fn test_scheduler_error_from_affinity() {
    let err: SchedulerError = AffinityError::AlreadyBound("tag#3".into()).into();
    assert_eq!(
        err.to_string(),
        "worker affinity binding failed: thread is already bound to affinity tag#3"
    );
}

#[test]
fn test_work_errors() {
    assert_eq!(
        WorkError::Panicked("boom".into()).to_string(),
        "work item panicked: boom"
    );
    assert_eq!(
        WorkError::Cancelled.to_string(),
        "work item was cancelled before execution"
    );
}
