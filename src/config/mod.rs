//! Configuration models for pools, buffers and caches.

pub mod limits;
pub mod primitives;
pub mod scheduler;

pub use limits::{
    JsonFileLimits, ThreadLimits, ThreadLimitsSource, DEFAULT_MAX_THREADS, DEFAULT_MIN_THREADS,
};
pub use primitives::{ActionBufferConfig, TimedCacheConfig};
pub use scheduler::SchedulerConfig;
