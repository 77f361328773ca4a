//! Panic containment helpers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Render a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `f`, converting a panic into `Err` with the rendered payload.
///
/// # Errors
///
/// Returns the panic message if `f` panicked.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}
