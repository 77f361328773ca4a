//! Shared utilities.

pub mod panic;
pub mod telemetry;

pub use panic::{catch, panic_message};
pub use telemetry::{init_test_tracing, init_tracing};
