//! Tests for configuration validation

use affinity_sync::config::{ActionBufferConfig, SchedulerConfig, ThreadLimits, TimedCacheConfig};
use affinity_sync::core::ConfigError;
use std::time::Duration;

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.limits, ThreadLimits::new(20, 20));
    assert_eq!(config.thread_name_prefix, "affinity-worker");
    assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_builders() {
    let config = SchedulerConfig::new()
        .with_worker_count(4)
        .with_thread_name_prefix("ui")
        .with_shutdown_grace(Duration::from_millis(250))
        .with_stack_size(256 * 1024);
    assert_eq!(config.limits, ThreadLimits::fixed(4));
    assert_eq!(config.thread_name_prefix, "ui");
    assert_eq!(config.shutdown_grace_ms, 250);
    assert_eq!(config.stack_size, Some(256 * 1024));
}

#[test]
fn test_scheduler_config_invalid() {
    let blank = SchedulerConfig::new().with_thread_name_prefix("  ");
    assert_eq!(blank.validate(), Err(ConfigError::Empty("thread_name_prefix")));

    let no_stack = SchedulerConfig::new().with_stack_size(0);
    assert_eq!(no_stack.validate(), Err(ConfigError::NotPositive("stack_size")));

    let inverted = SchedulerConfig::new().with_limits(ThreadLimits::new(8, 2));
    assert_eq!(
        inverted.validate(),
        Err(ConfigError::InvertedLimits { min: 8, max: 2 })
    );
}

#[test]
fn test_scheduler_config_from_json() {
    let config = SchedulerConfig::from_json_str(
        r#"{
            "min_threads": 2,
            "max_threads": 4,
            "thread_name_prefix": "render",
            "shutdown_grace_ms": 500
        }"#,
    )
    .unwrap();
    assert_eq!(config.limits, ThreadLimits::new(2, 4));
    assert_eq!(config.thread_name_prefix, "render");
    assert_eq!(config.stack_size, None);

    let err = SchedulerConfig::from_json_str(
        r#"{"min_threads": 0, "max_threads": 4, "thread_name_prefix": "x", "shutdown_grace_ms": 1}"#,
    )
    .unwrap_err();
    assert_eq!(err, ConfigError::NotPositive("min_threads"));
}

#[test]
fn test_action_buffer_config() {
    let config = ActionBufferConfig::default();
    assert_eq!(config.name, "ActionBuffer");
    assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    assert!(config.validate().is_ok());
    assert_eq!(
        ActionBufferConfig::new().with_name("").validate(),
        Err(ConfigError::Empty("name"))
    );
}

#[test]
fn test_timed_cache_config_sweep_defaults_to_expiration() {
    let config = TimedCacheConfig::new(Duration::from_millis(750));
    assert_eq!(config.sweep_interval(), Duration::from_millis(750));

    let config = config.with_sweep_interval(Duration::from_millis(100));
    assert_eq!(config.expiration(), Duration::from_millis(750));
    assert_eq!(config.sweep_interval(), Duration::from_millis(100));
}

#[test]
fn test_timed_cache_config_from_json() {
    let config = TimedCacheConfig::from_json_str(r#"{"expiration_ms": 1000}"#).unwrap();
    assert_eq!(config.sweep_interval, None);
    assert_eq!(config.shutdown_grace, Duration::from_secs(1));

    assert_eq!(
        TimedCacheConfig::from_json_str(r#"{"expiration_ms": 0}"#),
        Err(ConfigError::NotPositive("expiration_ms"))
    );
    assert!(matches!(
        TimedCacheConfig::from_json_str("{"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_timed_cache_config_keeps_sub_millisecond_precision() {
    let config = TimedCacheConfig::new(Duration::from_micros(1_900))
        .with_sweep_interval(Duration::from_micros(500));
    assert_eq!(config.expiration(), Duration::from_micros(1_900));
    assert_eq!(config.sweep_interval(), Duration::from_micros(500));
    assert!(config.validate().is_ok());

    // Milliseconds only apply to the JSON form.
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(
        json,
        r#"{"expiration_ms":1,"sweep_interval_ms":0,"shutdown_grace_ms":1000}"#
    );
}
