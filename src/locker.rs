//! Scoped mutual exclusion with monitor semantics.
//!
//! [`Locker`] owns a value and guards it with a monitor: exactly one thread
//! holds the lock at a time, the holder can block on the lock's condition
//! (`wait`) and wake other waiters (`pulse_one` / `pulse_all`).
//!
//! Three acquisition styles are offered:
//!
//! - closure-scoped: [`Locker::run`] and [`Locker::try_run`]
//! - token-scoped: [`Locker::usage_token`] returns a [`UsageToken`] that
//!   releases the lock when dropped, on every exit path
//! - manual: [`Locker::lock`] / [`Locker::unlock`], checked at runtime
//!
//! Ownership is re-entrant; borrowing the value is not. A thread may nest
//! `lock` calls, or call `run` while it holds a manual level, but a second
//! borrow of the value on the same thread is refused with
//! [`LockerError::Reentrant`].
//!
//! # Examples
//!
//! ```
//! use affinity_sync::Locker;
//! use std::time::Duration;
//!
//! let locker = Locker::new(Vec::new());
//! locker.run(|items| items.push(1))?;
//!
//! let ran = locker.try_run(Duration::ZERO, |items| items.push(2));
//! assert!(ran.is_some());
//!
//! let token = locker.usage_token()?;
//! assert_eq!(*token, vec![1, 2]);
//! # Ok::<(), affinity_sync::core::LockerError>(())
//! ```
//!
//! Waiting on the lock's condition:
//!
//! ```
//! use affinity_sync::Locker;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let locker = Arc::new(Locker::new(false));
//! let signaller = Arc::clone(&locker);
//!
//! let mut ready = locker.usage_token()?;
//! thread::spawn(move || {
//!     let mut ready = signaller.usage_token().unwrap();
//!     *ready = true;
//!     ready.pulse_one();
//! });
//! while !*ready {
//!     ready.wait();
//! }
//! # Ok::<(), affinity_sync::core::LockerError>(())
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::core::LockerError;

/// Deadline for a relative timeout; `None` when it does not fit in an `Instant`.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    /// Acquisitions held by `owner`; zero when unowned.
    depth: usize,
    /// A usage token of `owner` currently borrows the value.
    value_held: bool,
    next_ticket: u64,
    /// Tickets of threads blocked in `wait`, oldest first.
    waiting: VecDeque<u64>,
    /// Tickets that have been pulsed but not yet observed by their waiter.
    pulsed: HashSet<u64>,
}

/// Re-entrant ownership record plus the two wait queues of a monitor.
#[derive(Debug, Default)]
struct Monitor {
    state: Mutex<MonitorState>,
    /// Signalled whenever the owner slot becomes free.
    released: Condvar,
    /// Signalled whenever a waiter ticket is pulsed.
    pulses: Condvar,
}

impl Monitor {
    /// Acquire one level of ownership, waiting until `deadline` (forever
    /// when `None`). With `claim_value` the acquisition also borrows the
    /// guarded value.
    ///
    /// Returns `Ok(false)` if the deadline passed first.
    fn acquire(&self, deadline: Option<Instant>, claim_value: bool) -> Result<bool, LockerError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if claim_value && state.owner == Some(me) && state.value_held {
            return Err(LockerError::Reentrant);
        }
        if !Self::enter(&self.released, &mut state, me, deadline) {
            return Ok(false);
        }
        if claim_value {
            state.value_held = true;
        }
        Ok(true)
    }

    fn enter(
        released: &Condvar,
        state: &mut MutexGuard<'_, MonitorState>,
        me: ThreadId,
        deadline: Option<Instant>,
    ) -> bool {
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return true;
                }
                Some(_) => {}
            }
            match deadline {
                None => released.wait(state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    // A timed-out wake still re-checks the owner slot above.
                    let _ = released.wait_until(state, deadline);
                }
            }
        }
    }

    /// Give back one level of ownership. A token release also ends the
    /// value borrow; a manual release may not take the token's level.
    fn release(&self, token: bool) -> Result<(), LockerError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return Err(LockerError::NotHeld);
        }
        if token {
            state.value_held = false;
        } else if state.depth <= usize::from(state.value_held) {
            return Err(LockerError::NotHeld);
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        state.owner = None;
        drop(state);
        self.released.notify_one();
        Ok(())
    }

    /// Release every level, block until pulsed or `timeout` elapses, then
    /// re-acquire at the same depth.
    fn wait(&self, timeout: Option<Duration>, token: bool) -> Result<bool, LockerError> {
        let me = thread::current().id();
        let deadline = timeout.and_then(deadline_after);
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return Err(LockerError::NotHeld);
        }
        // The token's value guard stays locked unless the token itself waits.
        if state.value_held && !token {
            return Err(LockerError::Reentrant);
        }

        let depth = state.depth;
        let value_held = state.value_held;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back(ticket);
        state.owner = None;
        state.depth = 0;
        state.value_held = false;
        self.released.notify_one();

        let pulsed = loop {
            if state.pulsed.remove(&ticket) {
                break true;
            }
            match deadline {
                None => self.pulses.wait(&mut state),
                Some(deadline) => {
                    if self.pulses.wait_until(&mut state, deadline).timed_out() {
                        if state.pulsed.remove(&ticket) {
                            break true;
                        }
                        state.waiting.retain(|t| *t != ticket);
                        break false;
                    }
                }
            }
        };

        Self::enter(&self.released, &mut state, me, None);
        state.depth = depth;
        state.value_held = value_held;
        Ok(pulsed)
    }

    fn pulse(&self, all: bool) -> Result<(), LockerError> {
        let mut guard = self.state.lock();
        if guard.owner != Some(thread::current().id()) {
            return Err(LockerError::NotHeld);
        }
        let state = &mut *guard;
        if all {
            state.pulsed.extend(state.waiting.drain(..));
        } else if let Some(ticket) = state.waiting.pop_front() {
            state.pulsed.insert(ticket);
        } else {
            return Ok(());
        }
        drop(guard);
        self.pulses.notify_all();
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

/// Monitor level and value borrow held by a token; released when dropped.
struct MonitorHold<'a> {
    monitor: &'a Monitor,
}

impl Drop for MonitorHold<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.monitor.release(true) {
            debug!(error = %err, "usage token released a lock it no longer owned");
        }
    }
}

/// A value guarded by a monitor.
///
/// See the [module documentation](self) for the acquisition styles.
/// The monitor is re-entrant: a thread holding the lock may acquire it
/// again and must release it as many times. Only one borrow of the value
/// may be live per thread, so a nested [`run`](Self::run) or
/// [`usage_token`](Self::usage_token) fails with [`LockerError::Reentrant`].
pub struct Locker<T> {
    monitor: Monitor,
    value: Mutex<T>,
}

impl<T> Locker<T> {
    /// Wrap `value` in a new, unlocked locker.
    pub fn new(value: T) -> Self {
        Self {
            monitor: Monitor::default(),
            value: Mutex::new(value),
        }
    }

    /// Consume the locker and return the guarded value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Run `f` while holding the lock, waiting as long as needed.
    ///
    /// The lock is released when `f` returns or unwinds.
    ///
    /// # Errors
    ///
    /// [`LockerError::Reentrant`] if the current thread is already inside
    /// `run` or holds a [`UsageToken`] for this locker.
    pub fn run<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, LockerError> {
        let mut token = self.usage_token()?;
        Ok(f(&mut token))
    }

    /// Run `f` if the lock can be acquired within `timeout`.
    ///
    /// `Duration::ZERO` polls without blocking. Returns `None`, without
    /// running `f`, when the lock could not be acquired in time or the value
    /// is already borrowed on this thread.
    pub fn try_run<R>(&self, timeout: Duration, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.try_usage_token(timeout).map(|mut token| f(&mut token))
    }

    /// Acquire the lock and return a token that releases it on drop.
    ///
    /// # Errors
    ///
    /// [`LockerError::Reentrant`] if the current thread already holds a
    /// token for this locker.
    pub fn usage_token(&self) -> Result<UsageToken<'_, T>, LockerError> {
        self.monitor.acquire(None, true)?;
        Ok(self.token())
    }

    /// Acquire the lock within `timeout` and return a scoped token.
    pub fn try_usage_token(&self, timeout: Duration) -> Option<UsageToken<'_, T>> {
        match self.monitor.acquire(deadline_after(timeout), true) {
            Ok(true) => Some(self.token()),
            Ok(false) => None,
            Err(err) => {
                debug!(error = %err, "try_usage_token refused");
                None
            }
        }
    }

    fn token(&self) -> UsageToken<'_, T> {
        UsageToken {
            guard: self.value.lock(),
            hold: MonitorHold {
                monitor: &self.monitor,
            },
        }
    }

    /// Manually acquire one level of the lock, waiting as long as needed.
    ///
    /// Manual holders exclude other threads but get no access to the value;
    /// every `lock` must be paired with an [`unlock`](Self::unlock) on the
    /// same thread. Nested calls on the owning thread return immediately.
    pub fn lock(&self) {
        // Without a value claim the acquisition cannot fail.
        let _ = self.monitor.acquire(None, false);
    }

    /// Release one level taken with [`lock`](Self::lock).
    ///
    /// # Errors
    ///
    /// [`LockerError::NotHeld`] if the current thread holds no manual level
    /// of the lock.
    pub fn unlock(&self) -> Result<(), LockerError> {
        self.monitor.release(false)
    }

    /// Release a manually held lock, wait for a pulse, then re-acquire it at
    /// the same depth.
    ///
    /// # Errors
    ///
    /// [`LockerError::NotHeld`] if the current thread does not hold the lock,
    /// [`LockerError::Reentrant`] if it holds a [`UsageToken`], which must be
    /// waited on through [`UsageToken::wait`] instead.
    pub fn wait(&self) -> Result<(), LockerError> {
        self.monitor.wait(None, false).map(|_| ())
    }

    /// Like [`wait`](Self::wait) but gives up waiting for a pulse after
    /// `timeout`. The lock is re-acquired either way.
    ///
    /// Returns `true` if pulsed, `false` if the timeout elapsed.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait).
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, LockerError> {
        self.monitor.wait(Some(timeout), false)
    }

    /// Wake the longest-waiting thread blocked in a wait on this lock.
    ///
    /// # Errors
    ///
    /// [`LockerError::NotHeld`] if the current thread does not hold the lock.
    pub fn pulse_one(&self) -> Result<(), LockerError> {
        self.monitor.pulse(false)
    }

    /// Wake every thread blocked in a wait on this lock.
    ///
    /// # Errors
    ///
    /// [`LockerError::NotHeld`] if the current thread does not hold the lock.
    pub fn pulse_all(&self) -> Result<(), LockerError> {
        self.monitor.pulse(true)
    }

    /// Whether any thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.monitor.is_locked()
    }
}

impl<T: Default> Default for Locker<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Locker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof of holding a [`Locker`]; dereferences to the guarded value.
///
/// Dropping the token releases the lock exactly once, whether the scope
/// ends normally, returns early, or unwinds.
pub struct UsageToken<'a, T> {
    // Field order matters: the value guard drops before ownership is released.
    guard: MutexGuard<'a, T>,
    hold: MonitorHold<'a>,
}

impl<T> UsageToken<'_, T> {
    /// Release the lock, block until pulsed, then re-acquire it.
    pub fn wait(&mut self) {
        let _ = self.wait_inner(None);
    }

    /// Release the lock and wait for a pulse for at most `timeout`.
    ///
    /// The lock is held again when this returns. Returns `true` if pulsed,
    /// `false` if the timeout elapsed.
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        self.wait_inner(Some(timeout))
    }

    fn wait_inner(&mut self, timeout: Option<Duration>) -> bool {
        let monitor = self.hold.monitor;
        let outcome = MutexGuard::unlocked(&mut self.guard, || monitor.wait(timeout, true));
        match outcome {
            Ok(pulsed) => pulsed,
            Err(err) => {
                debug!(error = %err, "usage token wait without ownership");
                false
            }
        }
    }

    /// Wake the longest-waiting thread blocked on this lock.
    pub fn pulse_one(&self) {
        if let Err(err) = self.hold.monitor.pulse(false) {
            debug!(error = %err, "usage token pulse without ownership");
        }
    }

    /// Wake every thread blocked on this lock.
    pub fn pulse_all(&self) {
        if let Err(err) = self.hold.monitor.pulse(true) {
            debug!(error = %err, "usage token pulse without ownership");
        }
    }
}

impl<T> Deref for UsageToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for UsageToken<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: fmt::Debug> fmt::Debug for UsageToken<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UsageToken").field(&*self.guard).finish()
    }
}
