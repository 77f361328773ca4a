//! Integration tests for TimedCache
//!
//! Timing-based tests use generous margins around the sweep schedule.

use affinity_sync::config::TimedCacheConfig;
use affinity_sync::core::{CacheError, NullSink};
use affinity_sync::{CacheOutcome, TimedCache};
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::hash::{Hash, Hasher};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPERS
// ============================================================================

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Session key compared case-insensitively.
#[derive(Debug, Clone)]
struct SessionKey(String);

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for SessionKey {}

impl Hash for SessionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

// ============================================================================
// TESTS
// ============================================================================

/// A touched item survives the sweep that would have expired it
#[test]
fn test_touch_resets_expiration() {
    let cache = TimedCache::new(Duration::from_millis(200)).unwrap();
    let (expired_tx, expired_rx) = mpsc::channel();
    let expired_tx = Mutex::new(expired_tx);
    cache.on_item_expired(move |item: &&'static str| {
        let _ = expired_tx.lock().send(*item);
    });

    let start = Instant::now();
    assert_eq!(cache.cache("A").unwrap(), CacheOutcome::Added);
    thread::sleep(Duration::from_millis(150).saturating_sub(start.elapsed()));
    assert_eq!(cache.cache("A").unwrap(), CacheOutcome::Updated);

    // First sweep at ~200ms sees an age of ~50ms.
    thread::sleep(Duration::from_millis(300).saturating_sub(start.elapsed()));
    assert!(cache.contains("A"));

    // Second sweep at ~400ms sees an age of ~250ms.
    assert_eq!(expired_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "A");
    assert!(!cache.contains("A"));
    assert!(expired_rx.recv_timeout(Duration::from_millis(300)).is_err());
}

/// Concurrent callers caching the same item see exactly one Added
#[test]
fn test_concurrent_same_key_single_add() {
    const THREADS: usize = 8;

    let cache = Arc::new(TimedCache::new(Duration::from_secs(60)).unwrap());
    let added_events = Arc::new(AtomicUsize::new(0));
    {
        let added_events = Arc::clone(&added_events);
        cache.on_item_added(move |_: &u64| {
            added_events.fetch_add(1, Ordering::SeqCst);
        });
    }

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.cache(42).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let added = outcomes.iter().filter(|o| **o == CacheOutcome::Added).count();
    assert_eq!(added, 1);
    assert_eq!(outcomes.len() - added, THREADS - 1);
    assert_eq!(cache.len(), 1);
    assert!(wait_until(Duration::from_secs(2), || added_events.load(Ordering::SeqCst) == 1));
}

/// Paused caches keep stale items until checking resumes
#[test]
fn test_pause_keeps_items_until_resume() {
    let cache = TimedCache::new(Duration::from_millis(50)).unwrap();
    cache.pause_checking().unwrap();
    cache.cache(1_u8).unwrap();

    thread::sleep(Duration::from_millis(200));
    assert!(cache.contains(&1));

    cache.resume_checking().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !cache.contains(&1)));
}

/// Overlapping manual sweeps expire each item exactly once
#[test]
fn test_concurrent_sweeps_expire_once() {
    const ITEMS: u32 = 200;

    let config = TimedCacheConfig::new(Duration::from_millis(10))
        .with_sweep_interval(Duration::from_secs(3_600));
    let cache = Arc::new(TimedCache::with_config(&config, RandomState::new(), Arc::new(NullSink)).unwrap());
    let events = Arc::new(AtomicUsize::new(0));
    {
        let events = Arc::clone(&events);
        cache.on_item_expired(move |_: &u32| {
            events.fetch_add(1, Ordering::SeqCst);
        });
    }
    for item in 0..ITEMS {
        cache.cache(item).unwrap();
    }
    thread::sleep(Duration::from_millis(30));

    let sweepers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.sweep().unwrap().len())
        })
        .collect();
    let removed: usize = sweepers.into_iter().map(|s| s.join().unwrap()).sum();

    assert_eq!(removed, ITEMS as usize);
    assert!(cache.is_empty());
    assert!(wait_until(Duration::from_secs(2), || events.load(Ordering::SeqCst) == ITEMS as usize));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(events.load(Ordering::SeqCst), ITEMS as usize);
}

/// Item identity follows the key type's own equality
#[test]
fn test_custom_equality_via_newtype() {
    let cache = TimedCache::with_hasher(Duration::from_secs(60), RandomState::new()).unwrap();
    assert_eq!(
        cache.cache(SessionKey("Alice".into())).unwrap(),
        CacheOutcome::Added
    );
    assert_eq!(
        cache.cache(SessionKey("ALICE".into())).unwrap(),
        CacheOutcome::Updated
    );
    assert_eq!(cache.len(), 1);
}

/// Handlers never run on the caching thread
#[test]
fn test_added_handler_runs_off_caller_thread() {
    let cache = TimedCache::new(Duration::from_secs(60)).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    cache.on_item_added(move |_: &i32| {
        let _ = tx.lock().send(thread::current().id());
    });

    cache.cache(1).unwrap();
    let handler_thread = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_ne!(handler_thread, thread::current().id());
}

/// A handler may dispose the cache that invoked it
#[test]
fn test_dispose_from_handler() {
    let cache = Arc::new(TimedCache::new(Duration::from_secs(60)).unwrap());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    {
        let weak = Arc::downgrade(&cache);
        cache.on_item_added(move |_: &i32| {
            if let Some(cache) = weak.upgrade() {
                cache.dispose();
            }
            let _ = tx.lock().send(());
        });
    }

    cache.cache(1).unwrap();
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(cache.is_disposed());
    assert_eq!(cache.cache(2), Err(CacheError::Disposed));
}

/// Zero expiration is rejected up front
#[test]
fn test_invalid_expiration() {
    assert!(matches!(
        TimedCache::<String>::new(Duration::ZERO),
        Err(CacheError::InvalidDuration { name: "expiration", .. })
    ));
}

/// A handler that blocks does not hold up expiry, and dispose stays bounded
#[test]
fn test_blocking_handler_does_not_stall_sweeps() {
    let config = TimedCacheConfig::new(Duration::from_millis(50))
        .with_shutdown_grace(Duration::from_millis(100));
    let cache = TimedCache::with_config(&config, RandomState::new(), Arc::new(NullSink)).unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    cache.on_item_added(move |_: &u32| {
        let _ = started_tx.lock().send(());
        thread::sleep(Duration::from_millis(1_500));
    });

    cache.cache(1).unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(wait_until(Duration::from_millis(500), || !cache.contains(&1)));

    let started = Instant::now();
    cache.dispose();
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// A key kept hot by touchers survives sweeps racing on other threads
#[test]
fn test_touch_racing_sweeps_never_loses_item() {
    const HOT: u32 = 7;
    const COLD: u32 = 99;

    let config = TimedCacheConfig::new(Duration::from_millis(200))
        .with_sweep_interval(Duration::from_millis(5));
    let cache = Arc::new(
        TimedCache::with_config(&config, RandomState::new(), Arc::new(NullSink)).unwrap(),
    );
    let expired = Arc::new(Mutex::new(Vec::new()));
    {
        let expired = Arc::clone(&expired);
        cache.on_item_expired(move |item: &u32| expired.lock().push(*item));
    }
    cache.cache(COLD).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                cache.cache(HOT).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
        }));
    }
    for _ in 0..2 {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let swept = cache.sweep().unwrap();
                assert!(!swept.contains(&HOT), "hot key was swept");
            }
        }));
    }

    thread::sleep(Duration::from_millis(600));
    stop.store(true, Ordering::SeqCst);
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(cache.contains(&HOT));
    assert!(!cache.contains(&COLD));
    assert!(wait_until(Duration::from_secs(2), || expired
        .lock()
        .contains(&COLD)));
    assert!(!expired.lock().contains(&HOT));
}

/// After racing pause/resume calls the flag matches what the sweeper does
#[test]
fn test_pause_resume_race_settles_consistently() {
    let config = TimedCacheConfig::new(Duration::from_millis(30))
        .with_sweep_interval(Duration::from_millis(10));
    let cache = Arc::new(
        TimedCache::with_config(&config, RandomState::new(), Arc::new(NullSink)).unwrap(),
    );
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::rng();
                barrier.wait();
                for _ in 0..200 {
                    if rng.random_bool(0.5) {
                        cache.pause_checking().unwrap();
                    } else {
                        cache.resume_checking().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let paused = cache.is_paused();
    cache.cache(1).unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(cache.contains(&1), paused);
}
