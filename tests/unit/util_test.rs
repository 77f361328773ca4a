//! Tests for utility functions

use affinity_sync::util::{catch, panic_message};
use std::panic;

#[test]
fn test_catch_passes_value_through() {
    assert_eq!(catch(|| "ok"), Ok("ok"));
}

#[test]
fn test_catch_renders_panic_payloads() {
    assert_eq!(catch(|| -> () { panic!("plain") }), Err("plain".to_string()));

    let code = 7;
    assert_eq!(
        catch(|| -> () { panic!("code {code}") }),
        Err("code 7".to_string())
    );
}

#[test]
fn test_panic_message_for_opaque_payload() {
    let payload = panic::catch_unwind(|| panic::panic_any(42_u32)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
}

#[test]
fn test_init_tracing_is_idempotent() {
    affinity_sync::util::init_tracing();
    affinity_sync::util::init_tracing();
}
