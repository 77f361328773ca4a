//! Expiring concurrent cache.
//!
//! A [`TimedCache`] remembers items for a fixed time after they were last
//! touched. A sweeper thread removes stale items on a fixed period; a
//! separate event thread delivers `ItemAdded` / `ItemExpired` notifications.
//! Handlers therefore never run on the thread that called
//! [`TimedCache::cache`], and a slow handler never delays expiry.
//!
//! ```
//! use affinity_sync::{CacheOutcome, TimedCache};
//! use std::time::Duration;
//!
//! let cache = TimedCache::new(Duration::from_secs(60))?;
//! assert_eq!(cache.cache("session-1")?, CacheOutcome::Added);
//! assert_eq!(cache.cache("session-1")?, CacheOutcome::Updated);
//! assert!(cache.contains(&"session-1"));
//! # Ok::<(), affinity_sync::core::CacheError>(())
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::action_buffer::ActionBuffer;
use crate::config::{ActionBufferConfig, TimedCacheConfig};
use crate::core::failure::{default_sink, Failure, SharedSink};
use crate::core::CacheError;
use crate::util::catch;

const COMPONENT: &str = "timed-cache";
const EVENT_THREAD: &str = "timed-cache-events";

/// Event handler invoked with the affected item.
pub type CacheHandler<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Result of [`TimedCache::cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The item was not present and has been inserted.
    Added,
    /// An equal item was present; its expiration clock was reset.
    Updated,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    touched: Instant,
}

impl CacheEntry {
    fn is_stale(self, now: Instant, expiration: Duration) -> bool {
        now.saturating_duration_since(self.touched) >= expiration
    }
}

/// Control messages for the sweeper thread.
enum Signal {
    Pause,
    Resume,
    Stop,
}

enum Event<T> {
    Added(T),
    Expired(T),
}

struct Shared<T, S> {
    entries: DashMap<T, CacheEntry, S>,
    expiration: Duration,
    added: RwLock<Vec<CacheHandler<T>>>,
    expired: RwLock<Vec<CacheHandler<T>>>,
    sink: SharedSink,
    paused: AtomicBool,
    disposed: AtomicBool,
}

impl<T, S> Shared<T, S>
where
    T: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Remove every stale entry and return the removed items.
    ///
    /// Staleness is re-checked under the shard lock, so an item touched after
    /// the scan survives.
    fn remove_stale(&self) -> Vec<T> {
        let now = Instant::now();
        let stale: Vec<T> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_stale(now, self.expiration))
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .remove_if(&key, |_, entry| entry.is_stale(now, self.expiration))
                    .map(|(item, _)| item)
            })
            .collect()
    }

    fn dispatch(&self, handlers: &RwLock<Vec<CacheHandler<T>>>, item: &T, what: &str) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        // Snapshot so handlers may subscribe further handlers.
        let handlers = handlers.read().clone();
        for handler in handlers {
            if let Err(panic) = catch(|| handler(item)) {
                self.sink.report(&Failure::new(COMPONENT, what, panic));
            }
        }
    }
}

/// Queue `event` for delivery on the event thread. Events posted after
/// disposal are dropped.
fn post_event<T, S>(shared: &Arc<Shared<T, S>>, events: &ActionBuffer, event: Event<T>)
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    let shared = Arc::clone(shared);
    let _ = events.enqueue(move || match event {
        Event::Added(item) => shared.dispatch(&shared.added, &item, "item added handler panicked"),
        Event::Expired(item) => {
            shared.dispatch(&shared.expired, &item, "item expired handler panicked");
        }
    });
}

/// Concurrent set of items that expire a fixed time after their last touch.
///
/// Item identity is `T`'s `Eq`/`Hash`; to cache by a custom equality, wrap
/// the item in a newtype. Dropping the cache disposes it.
pub struct TimedCache<T, S = ahash::RandomState>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<T, S>>,
    signals: Sender<Signal>,
    events: Arc<ActionBuffer>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    /// Serializes pause/resume so the flag matches the last signal sent.
    control: Mutex<()>,
}

impl<T> TimedCache<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Cache whose items expire `expiration` after their last touch.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidDuration`] for a zero expiration,
    /// [`CacheError::Spawn`] if the cache threads cannot be started.
    pub fn new(expiration: Duration) -> Result<Self, CacheError> {
        Self::with_hasher(expiration, ahash::RandomState::new())
    }
}

impl<T, S> TimedCache<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Like [`TimedCache::new`] with an explicit hasher.
    ///
    /// # Errors
    ///
    /// As [`TimedCache::new`].
    pub fn with_hasher(expiration: Duration, hasher: S) -> Result<Self, CacheError> {
        Self::with_config(&TimedCacheConfig::new(expiration), hasher, default_sink())
    }

    /// Cache built from `config`, reporting handler and sweep failures to `sink`.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidDuration`] for a zero expiration or sweep
    /// interval, [`CacheError::Spawn`] if the cache threads cannot be started.
    pub fn with_config(
        config: &TimedCacheConfig,
        hasher: S,
        sink: SharedSink,
    ) -> Result<Self, CacheError> {
        let expiration = config.expiration();
        let interval = config.sweep_interval();
        if expiration.is_zero() {
            return Err(CacheError::InvalidDuration {
                name: "expiration",
                value: expiration,
            });
        }
        if interval.is_zero() {
            return Err(CacheError::InvalidDuration {
                name: "sweep_interval",
                value: interval,
            });
        }

        let events = ActionBuffer::spawn(
            ActionBufferConfig::new()
                .with_name(EVENT_THREAD)
                .with_shutdown_grace(config.shutdown_grace),
            Arc::clone(&sink),
        )
        .map(Arc::new)
        .map_err(|e| CacheError::Spawn(e.to_string()))?;

        let shared = Arc::new(Shared {
            entries: DashMap::with_hasher(hasher),
            expiration,
            added: RwLock::new(Vec::new()),
            expired: RwLock::new(Vec::new()),
            sink,
            paused: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });
        let (signals, receiver) = unbounded();

        let sweeper = {
            let shared = Arc::clone(&shared);
            let events = Arc::clone(&events);
            thread::Builder::new()
                .name(COMPONENT.to_string())
                .spawn(move || run_sweeper(&shared, &events, &receiver, interval))
                .map_err(|e| CacheError::Spawn(e.to_string()))?
        };

        debug!(?expiration, sweep_interval = ?interval, "timed cache started");

        Ok(Self {
            shared,
            signals,
            events,
            sweeper: Mutex::new(Some(sweeper)),
            control: Mutex::new(()),
        })
    }

    /// Add `item`, or reset its expiration clock if an equal item is cached.
    ///
    /// # Errors
    ///
    /// [`CacheError::Disposed`] after disposal.
    pub fn cache(&self, item: T) -> Result<CacheOutcome, CacheError> {
        self.cache_with(item, |_| {}, |_| {})
    }

    /// Like [`cache`](Self::cache), then run `on_added` or `on_updated` on
    /// the calling thread. Registered `ItemAdded` handlers still run on the
    /// event thread.
    ///
    /// # Errors
    ///
    /// [`CacheError::Disposed`] after disposal.
    pub fn cache_with(
        &self,
        item: T,
        on_added: impl FnOnce(&T),
        on_updated: impl FnOnce(&T),
    ) -> Result<CacheOutcome, CacheError> {
        self.ensure_live()?;
        let now = Instant::now();
        let outcome = match self.shared.entries.entry(item.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().touched = now;
                CacheOutcome::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(CacheEntry { touched: now });
                CacheOutcome::Added
            }
        };

        match outcome {
            CacheOutcome::Added => {
                on_added(&item);
                post_event(&self.shared, &self.events, Event::Added(item));
            }
            CacheOutcome::Updated => on_updated(&item),
        }
        Ok(outcome)
    }

    /// Subscribe to `ItemAdded`.
    pub fn on_item_added(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.shared.added.write().push(Arc::new(handler));
    }

    /// Subscribe to `ItemExpired`.
    pub fn on_item_expired(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.shared.expired.write().push(Arc::new(handler));
    }

    /// Suspend periodic sweeps. Entries are left as they are.
    ///
    /// # Errors
    ///
    /// [`CacheError::Disposed`] after disposal.
    pub fn pause_checking(&self) -> Result<(), CacheError> {
        self.set_paused(true)
    }

    /// Resume periodic sweeps; the next one is a full period away.
    ///
    /// # Errors
    ///
    /// [`CacheError::Disposed`] after disposal.
    pub fn resume_checking(&self) -> Result<(), CacheError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), CacheError> {
        self.ensure_live()?;
        let _control = self.control.lock();
        let signal = if paused { Signal::Pause } else { Signal::Resume };
        self.signals.send(signal).map_err(|_| CacheError::Disposed)?;
        self.shared.paused.store(paused, Ordering::Release);
        Ok(())
    }

    /// Run one sweep now and return the expired items. `ItemExpired`
    /// handlers are notified on the event thread.
    ///
    /// # Errors
    ///
    /// [`CacheError::Disposed`] after disposal.
    pub fn sweep(&self) -> Result<Vec<T>, CacheError> {
        self.ensure_live()?;
        let expired = self.shared.remove_stale();
        for item in &expired {
            post_event(&self.shared, &self.events, Event::Expired(item.clone()));
        }
        Ok(expired)
    }

    /// Whether an item equal to `item` is cached.
    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.entries.contains_key(item)
    }

    /// Number of cached items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    /// Whether periodic sweeps are suspended.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Time an untouched item lives.
    #[must_use]
    pub fn expiration(&self) -> Duration {
        self.shared.expiration
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop both cache threads. Remaining entries are kept but no longer
    /// expire, and no further notifications are delivered. A handler still
    /// running is given the configured grace period, then detached.
    /// Idempotent; safe to call from an event handler.
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            info!(entries = self.len(), "disposing timed cache");
            let _ = self.signals.send(Signal::Stop);
        }
        self.events.dispose();
        // The sweeper runs no user code, so it stops promptly.
        if let Some(sweeper) = self.sweeper.lock().take() {
            if sweeper.join().is_err() {
                warn!("timed cache sweeper thread panicked");
            }
        }
    }

    fn ensure_live(&self) -> Result<(), CacheError> {
        if self.is_disposed() {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }
}

impl<T, S> Drop for TimedCache<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T, S> fmt::Debug for TimedCache<T, S>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedCache")
            .field("expiration", &self.shared.expiration)
            .field("len", &self.len())
            .field("paused", &self.is_paused())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Fixed-rate schedule: the next deadline follows the previous one unless
/// the thread has fallen behind.
fn next_deadline(previous: Instant, interval: Duration) -> Option<Instant> {
    let now = Instant::now();
    match previous.checked_add(interval) {
        Some(next) if next > now => Some(next),
        _ => now.checked_add(interval),
    }
}

fn run_sweeper<T, S>(
    shared: &Arc<Shared<T, S>>,
    events: &ActionBuffer,
    signals: &Receiver<Signal>,
    interval: Duration,
) where
    T: Eq + Hash + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    let mut next_sweep = Instant::now().checked_add(interval);

    loop {
        if let Some(due) = next_sweep {
            if Instant::now() >= due {
                match catch(|| shared.remove_stale()) {
                    Ok(expired) => {
                        if !expired.is_empty() {
                            debug!(count = expired.len(), "expired cache items");
                        }
                        for item in expired {
                            post_event(shared, events, Event::Expired(item));
                        }
                    }
                    Err(panic) => shared
                        .sink
                        .report(&Failure::new(COMPONENT, "sweep panicked", panic)),
                }
                next_sweep = next_deadline(due, interval);
                continue;
            }
        }

        let signal = match next_sweep {
            Some(due) => signals.recv_deadline(due),
            None => signals.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match signal {
            Ok(Signal::Pause) => next_sweep = None,
            Ok(Signal::Resume) => {
                if next_sweep.is_none() {
                    next_sweep = Instant::now().checked_add(interval);
                }
            }
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    debug!("timed cache sweeper exiting");
}
