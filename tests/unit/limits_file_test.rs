//! Tests for the JSON-file thread limits source

use affinity_sync::config::{JsonFileLimits, ThreadLimits, ThreadLimitsSource};
use std::fs;

#[test]
fn test_missing_file_is_initialised_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");

    let limits = JsonFileLimits::load_or_init(&path);
    assert_eq!(limits.thread_limits(), ThreadLimits::default());

    let written: ThreadLimits = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, ThreadLimits::default());
}

#[test]
fn test_empty_file_is_initialised_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, "  \n").unwrap();

    let limits = JsonFileLimits::load_or_init(&path);
    assert_eq!(limits.thread_limits(), ThreadLimits::default());
    assert!(fs::read_to_string(&path).unwrap().contains("min_threads"));
}

#[test]
fn test_existing_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, r#"{"min_threads": 2, "max_threads": 6}"#).unwrap();

    let limits = JsonFileLimits::load_or_init(&path);
    assert_eq!(limits.thread_limits(), ThreadLimits::new(2, 6));
    assert_eq!(limits.path(), path.as_path());
}

#[test]
fn test_corrupt_file_falls_back_without_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, "{ not json").unwrap();

    let limits = JsonFileLimits::load_or_init(&path);
    assert_eq!(limits.thread_limits(), ThreadLimits::default());
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn test_invalid_limits_fall_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, r#"{"min_threads": 9, "max_threads": 3}"#).unwrap();

    let limits = JsonFileLimits::load_or_init(&path);
    assert_eq!(limits.thread_limits(), ThreadLimits::default());
}

#[test]
fn test_save_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, r#"{"min_threads": 3, "max_threads": 5}"#).unwrap();

    let limits = JsonFileLimits::load_or_init(&path);
    fs::remove_file(&path).unwrap();
    limits.save().unwrap();

    let reloaded = JsonFileLimits::load_or_init(&path);
    assert_eq!(reloaded.thread_limits(), ThreadLimits::new(3, 5));
}

#[test]
fn test_env_overrides_apply_when_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.json");
    fs::write(&path, r#"{"min_threads": 2, "max_threads": 6}"#).unwrap();

    std::env::set_var(JsonFileLimits::MIN_THREADS_ENV, "4");
    std::env::set_var(JsonFileLimits::MAX_THREADS_ENV, "12");
    let overridden = JsonFileLimits::load_or_init(&path).with_env_overrides();

    std::env::set_var(JsonFileLimits::MAX_THREADS_ENV, "1");
    let rejected = JsonFileLimits::load_or_init(&path).with_env_overrides();

    std::env::remove_var(JsonFileLimits::MIN_THREADS_ENV);
    std::env::remove_var(JsonFileLimits::MAX_THREADS_ENV);

    assert_eq!(overridden.thread_limits(), ThreadLimits::new(4, 12));
    assert_eq!(rejected.thread_limits(), ThreadLimits::new(2, 6));
}
