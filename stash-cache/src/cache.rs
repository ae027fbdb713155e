//! In-memory keyed cache of shared promises.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use stash_core::constants::DEFAULT_INITIAL_CAPACITY;
use stash_core::error::Result;
use stash_core::key::CacheKey;

/// A cache entry: one in-flight or settled result, cloneable by every consumer.
///
/// A rejected handle stays rejected; it is replayed until the key is
/// overwritten or removed.
pub type PromiseHandle<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of entries to preallocate
    pub initial_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    not_ready: AtomicU64,
    overwrites: AtomicU64,
    removals: AtomicU64,
}

/// Keyed cache of promises.
///
/// Thread-safe. Entries never expire; they leave the cache only through
/// [`KeyedCache::remove`], [`KeyedCache::set`] or [`KeyedCache::clear`].
pub struct KeyedCache<T> {
    /// Key → shared promise
    entries: Mutex<HashMap<CacheKey, PromiseHandle<T>>>,
    /// Key → creation gate, present only while a producer for the key may run
    creating: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// Key → version channel, bumped on overwrite and removal
    versions: DashMap<CacheKey, watch::Sender<u64>>,
    counters: Counters,
    config: CacheConfig,
}

impl<T> KeyedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a cache with custom configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(config.initial_capacity)),
            creating: DashMap::new(),
            versions: DashMap::with_capacity(config.initial_capacity),
            counters: Counters::default(),
            config,
        }
    }

    /// Returns the entry for `key`, invoking `producer` only if none exists.
    ///
    /// Returns `None` when the key is missing and the producer reports that
    /// no data is available yet; nothing is stored in that case.
    ///
    /// Creation is serialized per key: the map lock is released while the
    /// producer runs, so a producer may read or fill other keys of this
    /// cache. It must not call back into its own key.
    #[instrument(level = "debug", skip(self, producer))]
    pub fn get_or_create<F, Fut>(&self, key: &CacheKey, producer: F) -> Option<PromiseHandle<T>>
    where
        F: FnOnce() -> Option<Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(handle) = self.hit(key) {
            return Some(handle);
        }

        let gate = Arc::clone(self.creating.entry(key.clone()).or_default().value());
        let handle = {
            let _creating = gate.lock();
            self.create(key, producer)
        };

        // Drop the gate once nobody else is waiting on it.
        self.creating
            .remove_if(key, |_, pending| Arc::strong_count(pending) == 2);
        handle
    }

    fn hit(&self, key: &CacheKey) -> Option<PromiseHandle<T>> {
        let handle = self.entries.lock().get(key).cloned()?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit");
        Some(handle)
    }

    /// Runs with the key's creation gate held.
    fn create<F, Fut>(&self, key: &CacheKey, producer: F) -> Option<PromiseHandle<T>>
    where
        F: FnOnce() -> Option<Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Another creator may have filled the key while we waited.
        if let Some(handle) = self.hit(key) {
            return Some(handle);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let Some(fut) = producer() else {
            self.counters.not_ready.fetch_add(1, Ordering::Relaxed);
            trace!("Producer not ready, nothing cached");
            return None;
        };

        let handle = fut.boxed().shared();
        match self.entries.lock().entry(key.clone()) {
            // A `set` that landed while the producer ran wins.
            Entry::Occupied(existing) => {
                trace!("Entry written during producer call, fresh promise dropped");
                Some(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
                debug!("Cache miss, producer invoked");
                Some(handle)
            }
        }
    }

    /// Returns the entry for `key` without invoking any producer.
    pub fn get(&self, key: &CacheKey) -> Option<PromiseHandle<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Overwrites the entry for `key` with an already-resolved value.
    ///
    /// Returns the key's new version.
    #[instrument(level = "debug", skip(self, value))]
    pub fn set(&self, key: &CacheKey, value: T) -> u64 {
        let handle = futures::future::ready(Ok(value)).boxed().shared();
        self.entries.lock().insert(key.clone(), handle);
        self.counters.overwrites.fetch_add(1, Ordering::Relaxed);
        debug!("Cache entry overwritten");
        self.bump(key)
    }

    /// Removes the entry for `key`.
    ///
    /// Returns false (and leaves the version alone) if there was no entry.
    /// An in-flight fetch is not cancelled; its handle stays valid for
    /// whoever already holds it.
    #[instrument(level = "debug", skip(self))]
    pub fn remove(&self, key: &CacheKey) -> bool {
        if self.entries.lock().remove(key).is_none() {
            return false;
        }
        self.counters.removals.fetch_add(1, Ordering::Relaxed);
        debug!("Cache entry removed");
        self.bump(key);
        true
    }

    /// Removes every entry, bumping the version of each removed key.
    pub fn clear(&self) {
        let removed: Vec<CacheKey> = self.entries.lock().drain().map(|(k, _)| k).collect();
        self.counters
            .removals
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        for key in &removed {
            self.bump(key);
        }
        debug!(count = removed.len(), "Cache cleared");
    }

    /// Returns the current version of `key` (0 if never changed).
    pub fn version(&self, key: &CacheKey) -> u64 {
        self.versions
            .get(key)
            .map(|sender| *sender.borrow())
            .unwrap_or(0)
    }

    /// Subscribes to version changes of `key`.
    pub fn subscribe(&self, key: &CacheKey) -> watch::Receiver<u64> {
        self.versions
            .entry(key.clone())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    fn bump(&self, key: &CacheKey) -> u64 {
        let sender = self
            .versions
            .entry(key.clone())
            .or_insert_with(|| watch::channel(0).0);

        let mut next = 0;
        sender.send_modify(|version| {
            *version += 1;
            next = *version;
        });
        next
    }

    /// Returns true if `key` has an entry.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Returns the keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            not_ready: self.counters.not_ready.load(Ordering::Relaxed),
            overwrites: self.counters.overwrites.load(Ordering::Relaxed),
            removals: self.counters.removals.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for KeyedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently cached
    pub entries: usize,
    /// Lookups answered by an existing entry
    pub hits: u64,
    /// Lookups that found no entry
    pub misses: u64,
    /// Misses whose producer reported no data
    pub not_ready: u64,
    /// Entries written through `set`
    pub overwrites: u64,
    /// Entries removed
    pub removals: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use stash_core::error::StashError;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, assert_ready};

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw)
    }

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> Option<BoxFuture<'static, Result<u32>>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(async move { Ok(value) }.boxed())
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let first = {
            let calls = Arc::clone(&calls);
            cache
                .get_or_create(&key("user_1"), move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Some(async move { rx.await.map_err(StashError::rejected) })
                })
                .unwrap()
        };
        let second = cache
            .get_or_create(&key("user_1"), counting(&calls, 99))
            .unwrap();

        let mut pending = tokio_test::task::spawn(second.clone());
        assert_pending!(pending.poll());

        tx.send(7).unwrap();

        assert_eq!(first.await.unwrap(), 7);
        assert_eq!(second.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_forces_refetch() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_create(&key("user_1"), counting(&calls, 1)).unwrap().await.unwrap();
        assert!(cache.remove(&key("user_1")));

        let value = cache
            .get_or_create(&key("user_1"), counting(&calls, 2))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_is_read_without_producer() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set(&key("user_1"), 5);
        let handle = cache.get_or_create(&key("user_1"), counting(&calls, 9)).unwrap();

        let mut settled = tokio_test::task::spawn(handle);
        let value = assert_ready!(settled.poll());
        assert_eq!(value.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let cache = KeyedCache::<u32>::new();
        assert!(!cache.remove(&key("missing")));
        assert!(!cache.remove(&key("missing")));
        assert_eq!(cache.version(&key("missing")), 0);
        assert_eq!(cache.stats().removals, 0);
    }

    #[test]
    fn test_not_ready_stores_nothing() {
        let cache = KeyedCache::<u32>::new();
        let handle = cache.get_or_create(&key("user_1"), || None::<BoxFuture<'static, Result<u32>>>);

        assert!(handle.is_none());
        assert!(!cache.contains(&key("user_1")));
        assert_eq!(cache.stats().not_ready, 1);
    }

    #[test]
    fn test_producer_may_touch_other_keys() {
        let cache = KeyedCache::<u32>::new();

        let outer = cache.get_or_create(&key("outer"), || {
            cache.set(&key("inner"), 1);
            let inner = cache.get_or_create(&key("inner"), || None::<BoxFuture<'static, Result<u32>>>);
            assert!(inner.is_some());
            Some(async { Ok(2) })
        });

        assert!(outer.is_some());
        assert!(cache.contains(&key("outer")));
        assert!(cache.contains(&key("inner")));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_set_during_producer_call_wins() {
        let cache = KeyedCache::<u32>::new();

        let handle = cache
            .get_or_create(&key("user_1"), || {
                cache.set(&key("user_1"), 7);
                Some(async { Ok(9) })
            })
            .unwrap();

        assert_eq!(handle.await.unwrap(), 7);
        assert_eq!(cache.get(&key("user_1")).unwrap().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_entry_stays_cached() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(async { Err::<u32, _>(StashError::rejected_msg("upstream down")) })
            }
        };

        let err = cache.get_or_create(&key("user_1"), failing).unwrap().await.unwrap_err();
        assert!(err.is_producer_error());

        let replay = cache
            .get_or_create(&key("user_1"), counting(&calls, 1))
            .unwrap()
            .await;
        assert!(replay.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.remove(&key("user_1"));
        let retry = cache
            .get_or_create(&key("user_1"), counting(&calls, 1))
            .unwrap()
            .await;
        assert_eq!(retry.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_versions_notify_subscribers() {
        let cache = KeyedCache::<u32>::new();
        let mut rx = cache.subscribe(&key("user_1"));
        assert_eq!(*rx.borrow(), 0);

        assert_eq!(cache.set(&key("user_1"), 1), 1);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        cache.remove(&key("user_1"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);
        assert_eq!(cache.version(&key("user_1")), 2);
    }

    #[tokio::test]
    async fn test_remove_does_not_cancel_in_flight() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let in_flight = cache
            .get_or_create(&key("user_1"), move || {
                Some(async move { rx.await.map_err(StashError::rejected) })
            })
            .unwrap();

        assert!(cache.remove(&key("user_1")));
        tx.send(3).unwrap();
        assert_eq!(in_flight.await.unwrap(), 3);

        let fresh = cache
            .get_or_create(&key("user_1"), counting(&calls, 4))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(fresh, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_bumps_every_key() {
        let cache = KeyedCache::<u32>::new();
        cache.set(&key("a"), 1);
        cache.set(&key("b"), 2);

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.version(&key("a")), 2);
        assert_eq!(cache.version(&key("b")), 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = KeyedCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_create(&key("a"), counting(&calls, 1));
        cache.get_or_create(&key("a"), counting(&calls, 1));
        cache.set(&key("b"), 2);

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.overwrites, 1);
        assert_eq!(cache.keys().len(), 2);
    }
}
