//! # affinity_sync
//!
//! Small concurrency and resource-lifecycle building blocks for applications
//! that mix free-threaded code with work that must run on particular threads.
//!
//! ## Components
//!
//! - [`Locker`]: a value guarded by a monitor. Closure-scoped (`run`,
//!   `try_run`), token-scoped ([`UsageToken`]) or manual acquisition, with
//!   `wait` / `pulse` signalling between holders.
//! - [`ActionBuffer`]: a serial action queue. Closures run one at a time, in
//!   submission order, on a dedicated named thread; a panicking action is
//!   reported and the queue keeps going.
//! - [`TimedCache`]: a concurrent set whose items expire a fixed time after
//!   their last touch, with `ItemAdded` / `ItemExpired` notifications
//!   delivered off the caller's thread.
//! - [`AffinityTaskScheduler`](core::AffinityTaskScheduler): a fixed pool of
//!   worker threads bound to one execution [`Affinity`](core::Affinity).
//!   Work submitted from a thread that already has the affinity runs inline.
//!
//! ## Failures
//!
//! Work that runs on a background thread never takes that thread down.
//! Panics are captured and handed to a [`FailureSink`](core::FailureSink);
//! the default sink logs through `tracing`. Call
//! [`util::init_tracing`] to install a subscriber driven by `RUST_LOG`.
//!
//! ## Example
//!
//! ```
//! use affinity_sync::config::SchedulerConfig;
//! use affinity_sync::core::AffinityTaskScheduler;
//! use affinity_sync::Locker;
//! use std::sync::Arc;
//!
//! let totals = Arc::new(Locker::new(0_u64));
//! let scheduler = AffinityTaskScheduler::new(SchedulerConfig::new().with_worker_count(4))?;
//!
//! let handles: Vec<_> = (1..=10)
//!     .map(|n| {
//!         let totals = Arc::clone(&totals);
//!         scheduler.submit(move || totals.run(|sum| *sum += n).is_ok())
//!     })
//!     .collect::<Result<_, _>>()?;
//! for handle in handles {
//!     assert_eq!(handle.wait(), Ok(true));
//! }
//! assert_eq!(totals.run(|sum| *sum), Ok(55));
//! # Ok::<(), affinity_sync::core::SchedulerError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Serial action queue.
pub mod action_buffer;
/// Configuration models for pools, buffers and caches.
pub mod config;
/// Errors, failure sinks, the work queue and the affinity scheduler.
pub mod core;
/// Scoped mutual exclusion.
pub mod locker;
/// Expiring concurrent cache.
pub mod timed_cache;
/// Shared utilities.
pub mod util;

pub use action_buffer::{Action, ActionBuffer, BufferState, BufferStats};
pub use locker::{Locker, UsageToken};
pub use timed_cache::{CacheHandler, CacheOutcome, TimedCache};
