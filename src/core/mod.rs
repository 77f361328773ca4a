//! Error types, failure reporting, the shared work queue and the affinity
//! worker pool.

pub mod error;
pub mod failure;
pub mod scheduler;
pub mod work_queue;

pub use error::{
    AffinityError, AppResult, BufferError, CacheError, ConfigError, LockerError, SchedulerError,
    WorkError,
};
pub use failure::{default_sink, Failure, FailureSink, InMemorySink, NullSink, SharedSink, TracingSink};
pub use scheduler::{
    Affinity, AffinityBinding, AffinityTag, AffinityTaskScheduler, PendingWork, SchedulerStats,
    WorkHandle, WorkId, WorkerIdentity, WorkerState, WorkerStatus,
};
pub use work_queue::WorkQueue;
