//! Per-consumer views of a cached resource.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;

use stash_core::error::{Result, StashError};
use stash_core::key::CacheKey;
use stash_resolver::{CancellationToken, Phase, PromiseResolver, ResolverState, StateReceiver};

use crate::store::{ErasedValue, RemovalHandle, StoreBinding};

/// Looks up (or creates) the typed promise behind a view's key.
pub(crate) type Retrieve<T> = Box<dyn Fn() -> Option<BoxFuture<'static, Result<Arc<T>>>> + Send + Sync>;

pub(crate) fn downcast<T>(key: &CacheKey, value: ErasedValue) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
{
    value.downcast::<T>().map_err(|_| StashError::TypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// Writes to one key of a store, typed by the resource that owns it.
pub struct CacheHandle<T> {
    key: CacheKey,
    store: StoreBinding,
    _value: PhantomData<fn(T)>,
}

impl<T> Clone for CacheHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: self.store.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CacheHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle").field("key", &self.key).finish()
    }
}

impl<T> CacheHandle<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(key: CacheKey, store: StoreBinding) -> Self {
        Self {
            key,
            store,
            _value: PhantomData,
        }
    }

    /// Returns the key this handle writes to.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Replaces the key's entry with `value`; every consumer re-reads it.
    ///
    /// Returns the key's new version.
    pub fn update_cache(&self, value: T) -> u64 {
        self.store
            .inner
            .cache
            .set(&self.key, Arc::new(value) as ErasedValue)
    }

    /// Drops the key's entry; live consumers refetch on their next read.
    pub fn remove_cache(&self) -> bool {
        self.store.inner.cache.remove(&self.key)
    }

    /// Builds the handle stored in the store's removal registry.
    ///
    /// Holds the store weakly so the registry does not keep it alive.
    pub(crate) fn removal_handle(&self) -> RemovalHandle {
        let store = Arc::downgrade(&self.store.inner);
        let key = self.key.clone();
        Arc::new(move || {
            if let Some(inner) = store.upgrade() {
                inner.cache.remove(&key);
            }
        })
    }
}

/// What a consumer sees when it reads a resource.
pub struct CacheResponse<T> {
    /// True until the current promise settles
    pub is_fetching: bool,
    /// The resolved value, if any
    pub data: Option<Arc<T>>,
    /// The producer's rejection, if the current promise failed
    pub error: Option<StashError>,
    handle: CacheHandle<T>,
}

impl<T> Clone for CacheResponse<T> {
    fn clone(&self) -> Self {
        Self {
            is_fetching: self.is_fetching,
            data: self.data.clone(),
            error: self.error.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheResponse")
            .field("is_fetching", &self.is_fetching)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("key", &self.handle.key)
            .finish()
    }
}

impl<T> CacheResponse<T>
where
    T: Send + Sync + 'static,
{
    /// Returns the lifecycle phase of this response.
    pub fn phase(&self) -> Phase {
        Phase::of(self.is_fetching, self.error.is_some())
    }

    /// Replaces the cached value for this response's key.
    pub fn update_cache(&self, value: T) -> u64 {
        self.handle.update_cache(value)
    }

    /// Drops the cached value for this response's key.
    pub fn remove_cache(&self) -> bool {
        self.handle.remove_cache()
    }

    /// Returns the write handle for this response's key.
    pub fn handle(&self) -> &CacheHandle<T> {
        &self.handle
    }

    /// Converts a settled response into its result; `None` while fetching.
    pub fn into_result(self) -> Option<Result<Arc<T>>> {
        ResolverState {
            is_fetching: self.is_fetching,
            data: self.data,
            error: self.error,
        }
        .into_result()
    }
}

/// One consumer of one cache key.
///
/// Created by [`crate::Resource::access`]. Reading re-resolves whenever the
/// key's version moved since the last read. Dropping the view (or calling
/// [`CacheView::cancel`]) tears the consumer down: pending results are
/// discarded and no further state changes are applied.
pub struct CacheView<T: Send + Sync + 'static> {
    handle: CacheHandle<T>,
    retrieve: Retrieve<T>,
    resolver: PromiseResolver<Arc<T>, u64>,
    states: StateReceiver<Arc<T>>,
    versions: watch::Receiver<u64>,
    token: CancellationToken,
}

impl<T> CacheView<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(key: CacheKey, store: StoreBinding, retrieve: Retrieve<T>) -> Self {
        let handle = CacheHandle::new(key.clone(), store.clone());

        store.acquire(&key);
        store.register_removal(key.clone(), handle.removal_handle());

        let resolver = PromiseResolver::new();
        let states = resolver.subscribe();
        let versions = store.inner.cache.subscribe(&key);
        let token = store.inner.shutdown.child_token();

        Self {
            handle,
            retrieve,
            resolver,
            states,
            versions,
            token,
        }
    }

    /// Returns the key this view reads.
    pub fn key(&self) -> &CacheKey {
        self.handle.key()
    }

    /// Reads the resource, starting a fetch if the key changed since the last read.
    ///
    /// Outside a Tokio runtime no fetch starts and the response stays
    /// fetching; the next read inside a runtime starts it.
    pub fn current(&self) -> CacheResponse<T> {
        let version = self.handle.store.inner.cache.version(self.key());
        let state = self
            .resolver
            .resolve(version, &self.token, || (self.retrieve)());

        CacheResponse {
            is_fetching: state.is_fetching,
            data: state.data,
            error: state.error,
            handle: self.handle.clone(),
        }
    }

    /// Waits for the view's state or the key's version to change, then reads.
    ///
    /// Returns [`StashError::Cancelled`] once the view is torn down.
    pub async fn changed(&mut self) -> Result<CacheResponse<T>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(StashError::Cancelled),
            res = self.states.changed() => {
                res?;
            }
            res = self.versions.changed() => {
                res.map_err(|_| StashError::InternalError("cache dropped".into()))?;
            }
        }
        Ok(self.current())
    }

    /// Reads until the current promise settles.
    ///
    /// Keeps waiting while the producer reports not ready.
    pub async fn settled(&mut self) -> Result<CacheResponse<T>> {
        loop {
            let response = self.current();
            if !response.is_fetching {
                return Ok(response);
            }
            self.changed().await?;
        }
    }

    /// Returns the lifecycle phase without triggering a read.
    pub fn phase(&self) -> Phase {
        self.resolver.phase()
    }

    /// Replaces the cached value for this view's key.
    pub fn update_cache(&self, value: T) -> u64 {
        self.handle.update_cache(value)
    }

    /// Drops the cached value for this view's key.
    pub fn remove_cache(&self) -> bool {
        self.handle.remove_cache()
    }

    /// Tears the consumer down without dropping it.
    pub fn cancel(&self) {
        self.token.cancel();
        self.resolver.detach();
    }

    /// Returns true once the consumer is torn down.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.resolver.is_detached()
    }
}

impl<T: Send + Sync + 'static> Drop for CacheView<T> {
    fn drop(&mut self) {
        self.cancel();
        self.handle.store.release(&self.handle.key);
        debug!(key = %self.handle.key, "Consumer released");
    }
}
