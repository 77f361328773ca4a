//! Serial action queue.
//!
//! An [`ActionBuffer`] runs enqueued closures one at a time, in FIFO order,
//! on a single dedicated thread. Enqueueing never blocks.
//!
//! ```
//! use affinity_sync::ActionBuffer;
//! use std::sync::mpsc;
//!
//! let buffer = ActionBuffer::with_name("audit-writer")?;
//! let (tx, rx) = mpsc::channel();
//! for i in 0..3 {
//!     let tx = tx.clone();
//!     buffer.enqueue(move || tx.send(i).unwrap())?;
//! }
//! let seen: Vec<i32> = rx.iter().take(3).collect();
//! assert_eq!(seen, vec![0, 1, 2]);
//! buffer.dispose();
//! # Ok::<(), affinity_sync::core::BufferError>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ActionBufferConfig;
use crate::core::failure::{default_sink, Failure, SharedSink};
use crate::core::BufferError;
use crate::util::catch;

/// A buffered zero-argument callback.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const TERMINATED: u8 = 2;

/// Lifecycle of an [`ActionBuffer`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting and executing actions.
    Running,
    /// Shutdown requested; the current action may still be running.
    Draining,
    /// The execution thread has exited.
    Terminated,
}

/// Execution counters for an [`ActionBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Actions that ran to completion.
    pub executed: u64,
    /// Actions that panicked.
    pub failed: u64,
    /// Actions waiting in the queue.
    pub pending: usize,
}

struct Shared {
    name: String,
    state: AtomicU8,
    cancelled: AtomicBool,
    executed: AtomicU64,
    failed: AtomicU64,
    sink: SharedSink,
}

impl Shared {
    /// Flag cancellation and leave `Running`. Returns `true` on the first call.
    fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        let _ = self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire);
        first
    }

    fn execute(&self, action: Action) {
        match catch(action) {
            Ok(()) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.sink
                    .report(&Failure::new(&self.name, "buffered action panicked", panic));
            }
        }
    }
}

/// Marks the buffer terminated however the execution thread exits.
struct ExitGuard<'a> {
    shared: &'a Shared,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.shared.cancel();
        self.shared.state.store(TERMINATED, Ordering::Release);
        debug!(buffer = %self.shared.name, "action buffer thread exiting");
    }
}

/// Executes buffered actions out-of-band, in FIFO order, on one thread.
///
/// A panicking action is caught and reported to the buffer's failure sink;
/// it never stops the loop. Dropping the buffer disposes it.
pub struct ActionBuffer {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Action>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    /// Disconnects when the execution thread finishes.
    exited: Receiver<()>,
    shutdown_grace: Duration,
}

impl ActionBuffer {
    /// Start a buffer whose thread is named `ActionBuffer`.
    ///
    /// # Errors
    ///
    /// [`BufferError::Spawn`] if the thread cannot be started.
    pub fn new() -> Result<Self, BufferError> {
        Self::with_config(ActionBufferConfig::new())
    }

    /// Start a buffer whose thread is named `name`.
    ///
    /// # Errors
    ///
    /// [`BufferError::Spawn`] if the thread cannot be started.
    pub fn with_name(name: impl Into<String>) -> Result<Self, BufferError> {
        Self::with_config(ActionBufferConfig::new().with_name(name))
    }

    /// Start a buffer from `config`, reporting failures through `tracing`.
    ///
    /// # Errors
    ///
    /// [`BufferError::Spawn`] if the config is invalid or the thread cannot be started.
    pub fn with_config(config: ActionBufferConfig) -> Result<Self, BufferError> {
        Self::spawn(config, default_sink())
    }

    /// Start a buffer from `config`, reporting failed actions to `sink`.
    ///
    /// # Errors
    ///
    /// [`BufferError::Spawn`] if the config is invalid or the thread cannot be started.
    pub fn spawn(config: ActionBufferConfig, sink: SharedSink) -> Result<Self, BufferError> {
        config
            .validate()
            .map_err(|e| BufferError::Spawn(e.to_string()))?;

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: AtomicU8::new(RUNNING),
            cancelled: AtomicBool::new(false),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            sink,
        });
        let (sender, receiver) = unbounded::<Action>();
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(config.name.clone())
                .spawn(move || run_buffer(&shared, &receiver, exit_tx))
                .map_err(|e| BufferError::Spawn(e.to_string()))?
        };
        let worker_id = worker.thread().id();

        debug!(buffer = %config.name, "action buffer started");

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            worker_id,
            exited: exit_rx,
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Name of the execution thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Append `action` to the queue. Never blocks.
    ///
    /// # Errors
    ///
    /// [`BufferError::Disposed`] once shutdown has begun or the execution
    /// thread has exited.
    pub fn enqueue<F>(&self, action: F) -> Result<(), BufferError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.cancelled.load(Ordering::Acquire) {
            return Err(self.disposed());
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(self.disposed());
        };
        sender.send(Box::new(action)).map_err(|_| self.disposed())
    }

    fn disposed(&self) -> BufferError {
        BufferError::Disposed(self.shared.name.clone())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BufferState {
        match self.shared.state.load(Ordering::Acquire) {
            RUNNING => BufferState::Running,
            DRAINING => BufferState::Draining,
            _ => BufferState::Terminated,
        }
    }

    /// Number of actions waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Execution counters.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            executed: self.shared.executed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Stop accepting actions and shut the execution thread down.
    ///
    /// The action currently running (if any) completes; actions still queued
    /// are discarded. Waits up to the configured grace period for the thread
    /// to exit, then detaches it. Safe to call repeatedly, concurrently, and
    /// from inside an action running on this buffer.
    pub fn dispose(&self) {
        if self.shared.cancel() {
            info!(buffer = %self.shared.name, "disposing action buffer");
        }
        // Closing the sender wakes an idle execution thread.
        self.sender.lock().take();

        if thread::current().id() == self.worker_id {
            return;
        }

        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        match self.exited.recv_timeout(self.shutdown_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(buffer = %self.shared.name, "action buffer thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    buffer = %self.shared.name,
                    grace_ms = u64::try_from(self.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                    "action buffer thread did not exit within grace period - detaching"
                );
            }
        }
    }
}

impl Drop for ActionBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ActionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBuffer")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn run_buffer(shared: &Shared, actions: &Receiver<Action>, _exited: Sender<()>) {
    let _guard = ExitGuard { shared };
    debug!(buffer = %shared.name, "action buffer thread started");

    while let Ok(action) = actions.recv() {
        if shared.cancelled.load(Ordering::Acquire) {
            break;
        }
        shared.execute(action);
    }
}
