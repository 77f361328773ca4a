//! Affinity-constrained worker pool.
//!
//! An [`AffinityTaskScheduler`] owns a fixed set of worker threads that all
//! carry the same execution [`Affinity`]. Work submitted from a thread that
//! already satisfies the affinity runs inline; everything else is queued and
//! picked up by whichever worker is free.
//!
//! ```
//! use affinity_sync::config::SchedulerConfig;
//! use affinity_sync::core::AffinityTaskScheduler;
//!
//! let scheduler = AffinityTaskScheduler::new(SchedulerConfig::new().with_worker_count(2))?;
//! let handle = scheduler.submit(|| 6 * 7)?;
//! assert_eq!(handle.wait(), Ok(42));
//! assert_eq!(scheduler.maximum_concurrency()?, 2);
//! scheduler.dispose();
//! # Ok::<(), affinity_sync::core::SchedulerError>(())
//! ```

mod affinity;
mod handle;
mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

pub use affinity::{Affinity, AffinityBinding, AffinityTag};
pub use handle::WorkHandle;
pub use native::AffinityTaskScheduler;

/// Identifier of a submitted work item, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(u64);

impl WorkId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work#{}", self.0)
    }
}

/// Identity of one worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Position in the pool, starting at 0.
    pub index: usize,
    /// Thread name.
    pub name: String,
}

/// Worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Spawned, binding its affinity.
    Starting,
    /// Processing the queue.
    Running,
    /// Pool shutdown observed; finishing the current item.
    Draining,
    /// Thread exited.
    Terminated,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    /// Which worker.
    pub identity: WorkerIdentity,
    /// Its state when the snapshot was taken.
    pub state: WorkerState,
}

/// A queued work item, as reported by
/// [`AffinityTaskScheduler::scheduled_work`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWork {
    /// Item identifier.
    pub id: WorkId,
    /// Label given at submission, if any.
    pub label: Option<String>,
    /// Time spent in the queue so far.
    pub queued_for: Duration,
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Items accepted by `submit`.
    pub submitted: u64,
    /// Items that ran inline on the submitting thread.
    pub executed_inline: u64,
    /// Items that ran to completion.
    pub completed: u64,
    /// Items that panicked.
    pub panicked: u64,
    /// Items discarded by disposal before they ran.
    pub cancelled: u64,
    /// Items executing right now.
    pub active: u64,
    /// Items waiting in the queue.
    pub queued: usize,
}

/// Work item body. Returns `true` when the work finished without panicking.
pub(crate) type Job = Box<dyn FnOnce() -> bool + Send + 'static>;

pub(crate) struct WorkItem {
    pub id: WorkId,
    pub label: Option<String>,
    pub enqueued_at: Instant,
    pub job: Job,
}

impl WorkItem {
    fn pending(&self) -> PendingWork {
        PendingWork {
            id: self.id,
            label: self.label.clone(),
            queued_for: self.enqueued_at.elapsed(),
        }
    }
}

/// Per-worker shared state.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub identity: WorkerIdentity,
    state: AtomicU8,
}

impl WorkerSlot {
    fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            state: AtomicU8::new(WorkerState::Starting as u8),
        }
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move a live worker to `Draining`; terminated workers stay terminated.
    fn begin_draining(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                matches!(
                    WorkerState::from_u8(raw),
                    WorkerState::Starting | WorkerState::Running
                )
                .then_some(WorkerState::Draining as u8)
            });
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            identity: self.identity.clone(),
            state: self.state(),
        }
    }
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    pub submitted: AtomicU64,
    pub executed_inline: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
    pub cancelled: AtomicU64,
    pub active: AtomicU64,
}

impl SchedulerCounters {
    fn record(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Release);
        } else {
            self.panicked.fetch_add(1, Ordering::Release);
        }
    }

    /// Outcomes are read before `submitted`, so every outcome counted here
    /// has its submission counted too.
    fn snapshot(&self, worker_count: usize, queued: usize) -> SchedulerStats {
        let completed = self.completed.load(Ordering::Acquire);
        let panicked = self.panicked.load(Ordering::Acquire);
        let cancelled = self.cancelled.load(Ordering::Acquire);
        SchedulerStats {
            worker_count,
            submitted: self.submitted.load(Ordering::Acquire),
            executed_inline: self.executed_inline.load(Ordering::Relaxed),
            completed,
            panicked,
            cancelled,
            active: self.active.load(Ordering::Relaxed),
            queued,
        }
    }
}
