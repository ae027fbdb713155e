//! The shared registration surface.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument};

use stash_cache::{CacheStats, KeyedCache};
use stash_core::error::Result;
use stash_core::key::CacheKey;
use stash_core::traits::ResourceProducer;
use stash_resolver::CancellationToken;

use crate::config::StoreConfig;
use crate::resource::{deferred_fn, producer_fn, resource_fn, BoundResources, Resource, ResourceFn};

/// Values of every registered resource share one cache.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Evicts one key's entry; the eviction bumps the key version so live
/// consumers refetch.
pub type RemovalHandle = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct StoreInner {
    pub(crate) cache: KeyedCache<ErasedValue>,
    /// Key → first removal handle registered for it
    removals: DashMap<CacheKey, RemovalHandle>,
    /// Key → number of live consumers
    active: DashMap<CacheKey, usize>,
    pub(crate) config: StoreConfig,
    /// Parent of every consumer's cancellation token
    pub(crate) shutdown: CancellationToken,
}

/// Registration surface mapping named producers to accessors.
///
/// Cheap to clone; clones share the cache and the removal registry.
///
/// # Example
///
/// ```rust,ignore
/// use stash_store::StoreBinding;
///
/// let store = StoreBinding::new();
/// let user = store.register("user", |id: u32| async move { api.fetch_user(id).await });
///
/// let mut view = user.access(1)?;
/// let response = view.settled().await?;
///
/// store.clear_cache(&("user", 1))?;
/// ```
#[derive(Clone)]
pub struct StoreBinding {
    pub(crate) inner: Arc<StoreInner>,
}

static GLOBAL: OnceLock<StoreBinding> = OnceLock::new();

impl StoreBinding {
    /// Creates a new store with default configuration.
    pub fn new() -> Self {
        Self::build(StoreConfig::default())
    }

    /// Creates a store with custom configuration.
    ///
    /// Fails with [`ConfigError`](stash_core::StashError::ConfigError) if
    /// the configuration does not pass [`StoreConfig::validate`].
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                cache: KeyedCache::with_config(config.cache.clone()),
                removals: DashMap::new(),
                active: DashMap::new(),
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Returns the process-wide default store.
    pub fn global() -> &'static StoreBinding {
        GLOBAL.get_or_init(StoreBinding::new)
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Registers an always-ready async producer under `name`.
    pub fn register<A, T, F, Fut>(&self, name: impl Into<String>, producer: F) -> Resource<A, T>
    where
        A: 'static,
        T: Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.bind(name.into(), resource_fn(producer))
    }

    /// Registers a producer that may report "not ready" by returning `None`.
    pub fn register_deferred<A, T, F, Fut>(&self, name: impl Into<String>, producer: F) -> Resource<A, T>
    where
        A: 'static,
        T: Send + Sync + 'static,
        F: Fn(A) -> Option<Fut> + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.bind(name.into(), deferred_fn(producer))
    }

    /// Registers a [`ResourceProducer`] implementation under `name`.
    pub fn register_producer<A, P>(&self, name: impl Into<String>, producer: P) -> Resource<A, P::Output>
    where
        A: Send + 'static,
        P: ResourceProducer<A>,
    {
        self.bind(name.into(), producer_fn(producer))
    }

    /// Registers every named producer of one signature.
    pub fn register_all<A, T, N, I>(&self, resources: I) -> BoundResources<A, T>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, ResourceFn<A, T>)>,
    {
        let bound = resources
            .into_iter()
            .map(|(name, producer)| {
                let name = name.into();
                (name.clone(), self.bind(name, producer))
            })
            .collect();
        BoundResources::new(bound)
    }

    fn bind<A, T>(&self, name: String, producer: ResourceFn<A, T>) -> Resource<A, T> {
        debug!(resource = %name, "Resource registered");
        Resource::new(name, producer, self.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // REMOVAL REGISTRY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Registers the removal handle for `key` unless one already exists.
    ///
    /// Returns true if `handle` was stored; the first handle always wins.
    pub fn register_removal(&self, key: CacheKey, handle: RemovalHandle) -> bool {
        let mut registered = false;
        self.inner.removals.entry(key).or_insert_with(|| {
            registered = true;
            handle
        });
        if registered {
            debug!("Removal handle registered");
        }
        registered
    }

    /// Invokes the removal handle of the key derived from `args` alone.
    ///
    /// Pass the resource name first: `store.clear_cache(&("user", 1))`
    /// clears `user_1`. Returns false if no handle is registered.
    #[instrument(level = "debug", skip(self, args))]
    pub fn clear_cache<A>(&self, args: &A) -> Result<bool>
    where
        A: Serialize + ?Sized,
    {
        let key = CacheKey::from_args_with(args, &self.inner.config.key_separator)?;
        Ok(self.clear_key(&key))
    }

    /// Invokes the removal handle registered for `key`, if any.
    pub fn clear_key(&self, key: &CacheKey) -> bool {
        let handle = self.inner.removals.get(key).map(|h| Arc::clone(h.value()));
        match handle {
            Some(remove) => {
                remove();
                debug!(%key, "Cache cleared");
                true
            }
            None => false,
        }
    }

    /// Clears every registered key belonging to resource `name`.
    ///
    /// Returns the number of handles invoked.
    pub fn clear_resource(&self, name: &str) -> usize {
        let separator = &self.inner.config.key_separator;
        self.invoke_where(|key| key.belongs_to(name, separator))
    }

    /// Clears every registered key.
    ///
    /// Returns the number of handles invoked.
    pub fn clear_all(&self) -> usize {
        let count = self.invoke_where(|_| true);
        info!(count, "All cache keys cleared");
        count
    }

    fn invoke_where(&self, mut predicate: impl FnMut(&CacheKey) -> bool) -> usize {
        let handles: Vec<RemovalHandle> = self
            .inner
            .removals
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for remove in &handles {
            remove();
        }
        handles.len()
    }

    /// Returns every key with a registered removal handle.
    pub fn registered_keys(&self) -> Vec<CacheKey> {
        self.inner.removals.iter().map(|e| e.key().clone()).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CONSUMER TRACKING
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn acquire(&self, key: &CacheKey) {
        *self.inner.active.entry(key.clone()).or_insert(0) += 1;
    }

    pub(crate) fn release(&self, key: &CacheKey) {
        if let Some(mut count) = self.inner.active.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        self.inner.active.remove_if(key, |_, count| *count == 0);
    }

    /// Returns the keys that currently have at least one live consumer.
    pub fn active_keys(&self) -> Vec<CacheKey> {
        self.inner.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns true if `key` has at least one live consumer.
    pub fn is_active(&self, key: &CacheKey) -> bool {
        self.inner.active.contains_key(key)
    }

    /// Tears down every consumer of this store.
    ///
    /// Pending results are discarded; cached entries stay.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        info!("Store shut down");
    }

    /// Returns statistics of the underlying cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Returns true if `key` currently has a cache entry.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.inner.cache.contains(key)
    }
}

impl Default for StoreBinding {
    fn default() -> Self {
        Self::new()
    }
}
