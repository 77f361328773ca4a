//! Worker threads and the scheduler front-end.
//!
//! Workers block on the shared [`WorkQueue`]; cancelling the queue releases
//! all of them at once, so shutdown needs no polling.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, ThreadLimitsSource};
use crate::core::work_queue::WorkQueue;
use crate::core::{AffinityError, SchedulerError, WorkError};
use crate::util::catch;

use super::handle::{self, WorkHandle};
use super::{
    Affinity, Job, PendingWork, SchedulerCounters, SchedulerStats, WorkId, WorkItem,
    WorkerIdentity, WorkerSlot, WorkerState, WorkerStatus,
};

/// State shared between the scheduler and its workers.
struct Shared {
    queue: WorkQueue<WorkItem>,
    counters: SchedulerCounters,
    disposed: AtomicBool,
    slots: Vec<Arc<WorkerSlot>>,
}

impl Shared {
    /// Stop accepting work and release every worker. Returns `true` on the
    /// first call.
    fn shutdown(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for slot in &self.slots {
            slot.begin_draining();
        }
        let discarded = self.queue.cancel();
        if !discarded.is_empty() {
            self.counters
                .cancelled
                .fetch_add(discarded.len() as u64, Ordering::Release);
            debug!(count = discarded.len(), "discarding queued work items");
        }
        // Dropping the items drops their completers, cancelling the handles.
        drop(discarded);
        true
    }

    fn execute(&self, item: WorkItem, worker: &WorkerIdentity) {
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        debug!(worker = %worker.name, work_id = %item.id, "executing work item");
        let succeeded = (item.job)();
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        self.counters.record(succeeded);
    }
}

/// Shuts the pool down if the worker thread unwinds, and marks it terminated.
struct WorkerGuard<'a> {
    shared: &'a Shared,
    slot: &'a WorkerSlot,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = %self.slot.identity.name, "worker thread panicked - disposing scheduler");
            self.shared.shutdown();
        }
        self.slot.set_state(WorkerState::Terminated);
        debug!(worker = %self.slot.identity.name, "worker thread exiting");
    }
}

/// Fixed-size pool of worker threads bound to one execution affinity.
///
/// Submitting from a thread that satisfies the affinity (a worker, or an
/// application thread that claimed the tag) runs the work inline; otherwise
/// it is queued in FIFO order. Dropping the scheduler disposes it.
pub struct AffinityTaskScheduler {
    config: SchedulerConfig,
    affinity: Affinity,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    /// Disconnects once every worker has exited.
    exited: Receiver<()>,
    next_id: AtomicU64,
}

impl AffinityTaskScheduler {
    /// Start a pool under a fresh tagged affinity.
    ///
    /// # Errors
    ///
    /// See [`with_affinity`](Self::with_affinity).
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_affinity(config, Affinity::default())
    }

    /// Start a pool whose size comes from `source`.
    ///
    /// # Errors
    ///
    /// See [`with_affinity`](Self::with_affinity).
    pub fn from_source(
        source: &dyn ThreadLimitsSource,
        affinity: Affinity,
    ) -> Result<Self, SchedulerError> {
        Self::with_affinity(
            SchedulerConfig::new().with_limits(source.thread_limits()),
            affinity,
        )
    }

    /// Start `config.limits.min_threads` workers, each bound to `affinity`.
    ///
    /// Returns once every worker has bound its affinity.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidConfig`] if the configuration does not validate
    /// - [`SchedulerError::Spawn`] if a worker thread cannot be started
    /// - [`SchedulerError::Affinity`] if a worker fails to bind the affinity
    pub fn with_affinity(
        config: SchedulerConfig,
        affinity: Affinity,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let worker_count = config.limits.min_threads as usize;

        let slots: Vec<_> = (0..worker_count)
            .map(|index| {
                Arc::new(WorkerSlot::new(WorkerIdentity {
                    index,
                    name: format!("{}#{index}", config.thread_name_prefix),
                }))
            })
            .collect();
        let shared = Arc::new(Shared {
            queue: WorkQueue::new(),
            counters: SchedulerCounters::default(),
            disposed: AtomicBool::new(false),
            slots,
        });

        let (ready_tx, ready_rx) = bounded::<Result<(), AffinityError>>(worker_count);
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let mut workers = Vec::with_capacity(worker_count);

        for slot in &shared.slots {
            let spawned = spawn_worker(
                &config,
                Arc::clone(&shared),
                Arc::clone(slot),
                affinity.clone(),
                ready_tx.clone(),
                exit_tx.clone(),
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.shutdown();
                    join_all(workers);
                    return Err(SchedulerError::Spawn(err.to_string()));
                }
            }
        }
        drop(ready_tx);
        drop(exit_tx);

        for _ in 0..worker_count {
            let bound = ready_rx.recv().unwrap_or_else(|_| {
                Err(AffinityError::Binding("worker exited before binding".into()))
            });
            if let Err(err) = bound {
                shared.shutdown();
                join_all(workers);
                return Err(err.into());
            }
        }

        let worker_ids = workers.iter().map(|w| w.thread().id()).collect();
        info!(
            worker_count,
            affinity = %affinity.label(),
            prefix = %config.thread_name_prefix,
            "affinity task scheduler started"
        );

        Ok(Self {
            config,
            affinity,
            shared,
            workers: Mutex::new(workers),
            worker_ids,
            exited: exit_rx,
            next_id: AtomicU64::new(1),
        })
    }

    /// The affinity every worker is bound to.
    #[must_use]
    pub const fn affinity(&self) -> &Affinity {
        &self.affinity
    }

    fn ensure_live(&self) -> Result<(), SchedulerError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(SchedulerError::Disposed);
        }
        Ok(())
    }

    /// Submit `f` for execution under the scheduler's affinity.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Disposed`] after disposal.
    pub fn submit<F, R>(&self, f: F) -> Result<WorkHandle<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(None, f)
    }

    /// Like [`submit`](Self::submit), tagging the item with `label` for
    /// [`scheduled_work`](Self::scheduled_work).
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Disposed`] after disposal.
    pub fn submit_labeled<F, R>(
        &self,
        label: impl Into<String>,
        f: F,
    ) -> Result<WorkHandle<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(Some(label.into()), f)
    }

    fn submit_inner<F, R>(
        &self,
        label: Option<String>,
        f: F,
    ) -> Result<WorkHandle<R>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_live()?;
        let id = WorkId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let inline = self.affinity.is_satisfied();
        let (completer, handle) = handle::channel(id, inline);
        let job: Job = Box::new(move || completer.complete(catch(f).map_err(WorkError::Panicked)));

        if inline {
            self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
            self.shared
                .counters
                .executed_inline
                .fetch_add(1, Ordering::Relaxed);
            debug!(work_id = %id, "executing work item inline");
            let succeeded = job();
            self.shared.counters.record(succeeded);
            return Ok(handle);
        }

        let item = WorkItem {
            id,
            label,
            enqueued_at: Instant::now(),
            job,
        };
        // Counted before the push so a worker can never finish it uncounted.
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.shared.queue.push(item).is_err() {
            self.shared.counters.submitted.fetch_sub(1, Ordering::Relaxed);
            return Err(SchedulerError::Disposed);
        }
        Ok(handle)
    }

    /// Number of worker threads; fixed for the scheduler's lifetime.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Disposed`] after disposal.
    pub fn maximum_concurrency(&self) -> Result<usize, SchedulerError> {
        self.ensure_live()?;
        Ok(self.shared.slots.len())
    }

    /// Snapshot of the items still waiting in the queue, oldest first.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Disposed`] after disposal.
    pub fn scheduled_work(&self) -> Result<Vec<PendingWork>, SchedulerError> {
        self.ensure_live()?;
        Ok(self.shared.queue.snapshot(WorkItem::pending))
    }

    /// Status of every worker. Still available after disposal.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerStatus> {
        self.shared.slots.iter().map(|slot| slot.status()).collect()
    }

    /// Scheduler counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared
            .counters
            .snapshot(self.shared.slots.len(), self.shared.queue.len())
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop accepting work, cancel queued items and shut the workers down.
    ///
    /// Items already running complete. Waits up to the configured grace
    /// period for the workers to exit and detaches any that do not. Safe to
    /// call repeatedly and from a work item; a worker never joins itself.
    pub fn dispose(&self) {
        if self.shared.shutdown() {
            info!(affinity = %self.affinity.label(), "disposing affinity task scheduler");
        }
        if self.worker_ids.contains(&thread::current().id()) {
            return;
        }

        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }
        let handles: Vec<_> = workers.drain(..).collect();
        match self.exited.recv_timeout(self.config.shutdown_grace()) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    workers = handles.len(),
                    grace_ms = self.config.shutdown_grace_ms,
                    "workers did not exit within grace period - detaching"
                );
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => join_all(handles),
        }
    }
}

impl Drop for AffinityTaskScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for AffinityTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityTaskScheduler")
            .field("affinity", &self.affinity)
            .field("workers", &self.shared.slots.len())
            .field("queued", &self.shared.queue.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().map(str::to_owned);
        if handle.join().is_err() {
            warn!(worker = ?name, "worker thread panicked");
        }
    }
}

fn spawn_worker(
    config: &SchedulerConfig,
    shared: Arc<Shared>,
    slot: Arc<WorkerSlot>,
    affinity: Affinity,
    ready: Sender<Result<(), AffinityError>>,
    exited: Sender<()>,
) -> std::io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(slot.identity.name.clone());
    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }
    builder.spawn(move || {
        let _exited = exited;
        run_worker(&shared, &slot, &affinity, ready);
    })
}

fn run_worker(
    shared: &Shared,
    slot: &WorkerSlot,
    affinity: &Affinity,
    ready: Sender<Result<(), AffinityError>>,
) {
    let _guard = WorkerGuard { shared, slot };
    let worker = &slot.identity;

    let bound = affinity.bind(worker);
    let failed = bound.is_err();
    if let Err(err) = &bound {
        error!(worker = %worker.name, error = %err, "worker failed to bind affinity");
    }
    let _ = ready.send(bound);
    drop(ready);
    if failed {
        shared.shutdown();
        return;
    }

    slot.set_state(WorkerState::Running);
    debug!(worker = %worker.name, affinity = %affinity.label(), "worker thread started");

    while let Some(item) = shared.queue.pop() {
        shared.execute(item, worker);
    }
}
