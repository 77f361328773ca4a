//! Tests for failure sinks

use affinity_sync::core::{Failure, FailureSink, InMemorySink, NullSink, SharedSink, TracingSink};
use std::sync::Arc;

#[test]
fn test_in_memory_sink_records_in_order() {
    let sink = InMemorySink::new(10);
    sink.report(&Failure::new("buffer", "action panicked", "first"));
    sink.report(&Failure::new("buffer", "action panicked", "second"));

    let failures = sink.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].error, "first");
    assert_eq!(failures[1].error, "second");
}

#[test]
fn test_shared_sinks_are_interchangeable() {
    affinity_sync::util::init_test_tracing();
    let sinks: Vec<SharedSink> = vec![
        Arc::new(TracingSink),
        Arc::new(NullSink),
        Arc::new(InMemorySink::new(1)),
    ];
    let failure = Failure::new("timed-cache", "sweep panicked", "hash failed");
    for sink in &sinks {
        sink.report(&failure);
    }
}
