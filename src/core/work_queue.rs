//! Blocking multi-producer / multi-consumer work queue with cancellation.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

/// Unbounded FIFO queue shared by a pool of consumers.
///
/// `pop` blocks until an item arrives or the queue is cancelled. Once
/// cancelled, pushes are refused and every consumer is released.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                cancelled: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item and wake one consumer.
    ///
    /// # Errors
    ///
    /// Hands the item back if the queue has been cancelled.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available. `None` once cancelled, even if
    /// items remain.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.available.wait(&mut state);
        }
    }

    /// Take the head item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        state.items.pop_front()
    }

    /// Cancel the queue, release every consumer and return the items that
    /// were still pending. Later calls return an empty vector.
    pub fn cancel(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.cancelled = true;
        let pending = state.items.drain(..).collect();
        drop(state);
        self.available.notify_all();
        pending
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no item is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Map every pending item, in queue order, while holding the lock.
    pub fn snapshot<R>(&self, f: impl FnMut(&T) -> R) -> Vec<R> {
        self.state.lock().items.iter().map(f).collect()
    }
}
