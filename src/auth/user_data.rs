//! Per-user data cache with disposal semantics.
//!
//! Every user session owns one `UserDataCache`. Values are materialized on
//! demand by a caller-supplied factory and are disposed exactly once, when
//! the owning session goes away. Materialization and disposal both target
//! the same map, so they are serialized by a single per-cache lock; reads of
//! already-present values skip that lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, warn};

/// A value that can live in a [`UserDataCache`].
///
/// `dispose` runs exactly once when the value is evicted from a cache whose
/// session has ended. The default does nothing; types holding external
/// resources (connections, temp files, ...) override it.
pub trait UserData: Any + Send + Sync {
    fn dispose(&self) {}
}

type AnyData = Arc<dyn Any + Send + Sync>;

struct CachedEntry {
    value: AnyData,
    dispose: fn(&(dyn Any + Send + Sync)),
}

fn dispose_as<T: UserData>(value: &(dyn Any + Send + Sync)) {
    if let Some(typed) = value.downcast_ref::<T>() {
        typed.dispose();
    }
}

/// Lifecycle of a cache (and of the session owning it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Disposed,
}

/// Lazily-populated, typed key/value storage for one user session.
pub struct UserDataCache {
    entries: DashMap<String, CachedEntry>,
    /// Guards materialization and disposal.
    lifecycle: Mutex<Lifecycle>,
    /// Mirror of `lifecycle` for the unlocked fast path.
    disposed: AtomicBool,
}

impl UserDataCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            lifecycle: Mutex::new(Lifecycle::Active),
            disposed: AtomicBool::new(false),
        }
    }

    /// Get the value stored under `key`, creating it with `factory` if absent.
    ///
    /// The factory runs at most once per key for the lifetime of the cache,
    /// even when many callers race on the same key. It runs while the cache
    /// lock is held, so it must not call back into this cache.
    ///
    /// Returns `None` once the cache has been disposed (any value still found
    /// under `key` is disposed on the spot and the factory is not invoked),
    /// or when the stored value is of a different type than `T`.
    pub fn get_or_add<T, F>(&self, key: &str, factory: F) -> Option<Arc<T>>
    where
        T: UserData,
        F: FnOnce(&str) -> T,
    {
        if self.disposed.load(Ordering::Acquire) {
            self.discard(key);
            return None;
        }

        let existing = self.entries.get(key).map(|entry| entry.value.clone());
        if let Some(value) = existing {
            return Self::downcast(key, value);
        }

        let lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Disposed {
            // Lost the race against disposal.
            self.discard(key);
            return None;
        }

        let existing = self.entries.get(key).map(|entry| entry.value.clone());
        if let Some(value) = existing {
            return Self::downcast(key, value);
        }

        let value: AnyData = Arc::new(factory(key));
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value: value.clone(),
                dispose: dispose_as::<T>,
            },
        );
        drop(lifecycle);

        Self::downcast(key, value)
    }

    /// Get an existing value without materializing it.
    pub fn get<T: UserData>(&self, key: &str) -> Option<Arc<T>> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }
        let value = self.entries.get(key).map(|entry| entry.value.clone())?;
        Self::downcast(key, value)
    }

    /// Dispose every stored value and refuse further materialization.
    ///
    /// Returns `true` for the call that performed the disposal and `false`
    /// for every later call.
    pub fn dispose(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Disposed {
            return false;
        }
        *lifecycle = Lifecycle::Disposed;
        self.disposed.store(true, Ordering::Release);

        let keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.discard(&key);
        }
        true
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `key` and dispose its value. A panicking `dispose` is logged
    /// and swallowed so the remaining values still get theirs.
    fn discard(&self, key: &str) {
        let Some((_, entry)) = self.entries.remove(key) else {
            return;
        };
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| (entry.dispose)(&*entry.value)));
        if outcome.is_err() {
            error!("Disposing user data under key '{}' panicked", key);
        }
    }

    fn downcast<T: UserData>(key: &str, value: AnyData) -> Option<Arc<T>> {
        match value.downcast::<T>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                warn!(
                    "User data under key '{}' is not of type {}",
                    key,
                    std::any::type_name::<T>()
                );
                None
            }
        }
    }
}

impl Default for UserDataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UserDataCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for UserDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataCache")
            .field("entries", &self.entries.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    struct Counted {
        value: u32,
        disposals: Arc<AtomicUsize>,
    }

    impl UserData for Counted {
        fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Plain(&'static str);

    impl UserData for Plain {}

    fn counted(value: u32, disposals: &Arc<AtomicUsize>) -> Counted {
        Counted {
            value,
            disposals: disposals.clone(),
        }
    }

    #[test]
    fn test_get_or_add_materializes_once() {
        let cache = UserDataCache::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_add("prefs", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                counted(1, &disposals)
            })
            .unwrap();
        let second = cache
            .get_or_add("prefs", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                counted(2, &disposals)
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.value, 1);
        assert_eq!(second.value, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_factory_receives_key() {
        let cache = UserDataCache::new();
        let seen = cache
            .get_or_add("greeting", |key| Plain(if key == "greeting" { "hi" } else { "?" }))
            .unwrap();
        assert_eq!(seen.0, "hi");
    }

    #[test]
    fn test_concurrent_get_or_add_single_materialization() {
        let cache = UserDataCache::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(16);

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    barrier.wait();
                    for _ in 0..100 {
                        let value = cache.get_or_add("shared", |_| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            counted(7, &disposals)
                        });
                        assert_eq!(value.unwrap().value, 7);
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dispose_disposes_each_value_once() {
        let cache = UserDataCache::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        cache.get_or_add("a", |_| counted(1, &disposals));
        cache.get_or_add("b", |_| counted(2, &disposals));
        cache.get_or_add("c", |_| Plain("no-op"));

        assert!(cache.dispose());
        assert!(!cache.dispose());
        assert_eq!(disposals.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.lifecycle(), Lifecycle::Disposed);

        drop(cache);
        assert_eq!(disposals.load(Ordering::SeqCst), 2);
    }

    struct Faulty;

    impl UserData for Faulty {
        fn dispose(&self) {
            panic!("dispose failed");
        }
    }

    #[test]
    fn test_panicking_value_does_not_block_other_disposals() {
        let cache = UserDataCache::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        cache.get_or_add("faulty", |_| Faulty).unwrap();
        for i in 0..20 {
            cache.get_or_add(&format!("k{}", i), |_| counted(i, &disposals)).unwrap();
        }

        assert!(cache.dispose());
        assert!(cache.is_empty());
        assert_eq!(disposals.load(Ordering::SeqCst), 20);

        drop(cache);
        assert_eq!(disposals.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_get_or_add_after_dispose_returns_none_without_factory() {
        let cache = UserDataCache::new();
        cache.dispose();

        let called = AtomicUsize::new(0);
        let result = cache.get_or_add("late", |_| {
            called.fetch_add(1, Ordering::SeqCst);
            Plain("late")
        });

        assert!(result.is_none());
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(cache.get::<Plain>("late").is_none());
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let cache = UserDataCache::new();
        cache.get_or_add("key", |_| Plain("text"));

        let disposals = Arc::new(AtomicUsize::new(0));
        let wrong = cache.get_or_add("key", |_| counted(1, &disposals));
        assert!(wrong.is_none());
        assert!(cache.get::<Plain>("key").is_some());
    }

    #[test]
    fn test_drop_disposes_values() {
        let disposals = Arc::new(AtomicUsize::new(0));
        {
            let cache = UserDataCache::new();
            cache.get_or_add("a", |_| counted(1, &disposals));
        }
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_racing_materialization_never_leaks() {
        for _ in 0..50 {
            let cache = UserDataCache::new();
            let disposals = Arc::new(AtomicUsize::new(0));
            let created = AtomicUsize::new(0);
            let barrier = Barrier::new(5);

            std::thread::scope(|scope| {
                for worker in 0..4 {
                    let cache = &cache;
                    let disposals = &disposals;
                    let created = &created;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        for i in 0..50 {
                            let key = format!("k{}-{}", worker, i);
                            cache.get_or_add(&key, |_| {
                                created.fetch_add(1, Ordering::SeqCst);
                                counted(i, disposals)
                            });
                        }
                    });
                }
                barrier.wait();
                cache.dispose();
            });

            // Everything created before disposal was disposed by it; nothing
            // was created afterwards.
            assert!(cache.is_empty());
            assert_eq!(
                created.load(Ordering::SeqCst),
                disposals.load(Ordering::SeqCst)
            );
        }
    }
}
