//! Result handles for submitted work.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::core::WorkError;

use super::WorkId;

type Outcome<R> = Result<R, WorkError>;

/// Create the completion side and the caller's handle for one work item.
pub(crate) fn channel<R>(id: WorkId, inline: bool) -> (Completer<R>, WorkHandle<R>) {
    let (sender, receiver) = bounded(1);
    (
        Completer { sender },
        WorkHandle {
            id,
            inline,
            receiver,
        },
    )
}

/// Delivers a work item's outcome. Dropping it unresolved cancels the item.
pub(crate) struct Completer<R> {
    sender: Sender<Outcome<R>>,
}

impl<R> Completer<R> {
    /// Publish the outcome; returns whether the work succeeded.
    pub(crate) fn complete(self, outcome: Outcome<R>) -> bool {
        let succeeded = outcome.is_ok();
        // The caller may have dropped the handle.
        let _ = self.sender.send(outcome);
        succeeded
    }
}

/// Handle to the outcome of a submitted work item.
///
/// The outcome is delivered once: after it has been taken, further calls
/// report [`WorkError::Cancelled`].
pub struct WorkHandle<R> {
    id: WorkId,
    inline: bool,
    receiver: Receiver<Outcome<R>>,
}

impl<R> WorkHandle<R> {
    /// Identifier assigned at submission.
    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    /// Whether the item ran inline on the submitting thread.
    #[must_use]
    pub const fn was_inline(&self) -> bool {
        self.inline
    }

    /// Block until the item finishes.
    ///
    /// # Errors
    ///
    /// [`WorkError::Panicked`] if the item panicked, [`WorkError::Cancelled`]
    /// if it was discarded by scheduler disposal.
    pub fn wait(self) -> Outcome<R> {
        self.receiver.recv().unwrap_or(Err(WorkError::Cancelled))
    }

    /// Block for at most `timeout`.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait), plus [`WorkError::Timeout`] if the item has
    /// not finished in time. The handle stays usable after a timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome<R> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(WorkError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(WorkError::Cancelled),
        }
    }

    /// Outcome if the item has finished, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<Outcome<R>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(WorkError::Cancelled)),
        }
    }
}

impl<R> fmt::Debug for WorkHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandle")
            .field("id", &self.id)
            .field("inline", &self.inline)
            .finish_non_exhaustive()
    }
}
