//! Unit tests for individual components

mod config_test;
mod error_test;
mod failure_test;
mod limits_file_test;
mod util_test;
