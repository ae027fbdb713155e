//! Named resources and their producers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use serde::Serialize;

use stash_core::error::Result;
use stash_core::key::CacheKey;
use stash_core::traits::ResourceProducer;

use crate::store::{ErasedValue, StoreBinding};
use crate::view::{downcast, CacheView, Retrieve};

/// A type-erased producer: `None` means "not ready yet".
pub type ResourceFn<A, T> = Arc<dyn Fn(A) -> Option<BoxFuture<'static, Result<T>>> + Send + Sync>;

/// Boxes an always-ready async function as a [`ResourceFn`].
pub fn resource_fn<A, T, F, Fut>(producer: F) -> ResourceFn<A, T>
where
    A: 'static,
    T: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |args: A| Some(producer(args).boxed()))
}

/// Boxes a possibly-not-ready async function as a [`ResourceFn`].
pub fn deferred_fn<A, T, F, Fut>(producer: F) -> ResourceFn<A, T>
where
    A: 'static,
    T: 'static,
    F: Fn(A) -> Option<Fut> + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |args: A| producer(args).map(|fut| fut.boxed()))
}

/// Boxes a [`ResourceProducer`] as a [`ResourceFn`].
pub fn producer_fn<A, P>(producer: P) -> ResourceFn<A, P::Output>
where
    A: Send + 'static,
    P: ResourceProducer<A>,
{
    let producer = Arc::new(producer);
    Arc::new(move |args: A| {
        if !producer.is_ready(&args) {
            return None;
        }
        let producer = Arc::clone(&producer);
        Some(async move { producer.fetch(args).await }.boxed())
    })
}

/// A registered resource: the bound accessor for one name.
///
/// Each [`Resource::access`] call creates an independent consumer whose
/// cache key is the resource name joined with the rendered arguments.
pub struct Resource<A, T> {
    name: Arc<str>,
    producer: ResourceFn<A, T>,
    store: StoreBinding,
}

impl<A, T> Clone for Resource<A, T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            producer: Arc::clone(&self.producer),
            store: self.store.clone(),
        }
    }
}

impl<A, T> Resource<A, T> {
    pub(crate) fn new(name: String, producer: ResourceFn<A, T>, store: StoreBinding) -> Self {
        Self {
            name: name.into(),
            producer,
            store,
        }
    }

    /// Returns the name this resource was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, T> Resource<A, T>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Derives the cache key for `args`.
    pub fn key(&self, args: &A) -> Result<CacheKey> {
        CacheKey::derive_with(&self.name, args, &self.store.inner.config.key_separator)
    }

    /// Creates a consumer of this resource for `args`.
    ///
    /// The first consumer of a key registers the key's removal handle.
    /// Nothing is fetched until the consumer reads.
    pub fn access(&self, args: A) -> Result<CacheView<T>> {
        let key = self.key(&args)?;
        let retrieve = self.retriever(key.clone(), args);
        Ok(CacheView::new(key, self.store.clone(), retrieve))
    }

    /// Clears the cached entry for `args`, if its key was ever observed.
    pub fn clear(&self, args: &A) -> Result<bool> {
        let key = self.key(args)?;
        Ok(self.store.clear_key(&key))
    }

    /// Clears every observed key of this resource.
    pub fn clear_all(&self) -> usize {
        self.store.clear_resource(&self.name)
    }

    fn retriever(&self, key: CacheKey, args: A) -> Retrieve<T> {
        let store = self.store.clone();
        let producer = Arc::clone(&self.producer);

        Box::new(move || {
            let handle = store.inner.cache.get_or_create(&key, || {
                producer(args.clone())
                    .map(|fut| fut.map_ok(|value| Arc::new(value) as ErasedValue).boxed())
            })?;

            let key = key.clone();
            Some(
                handle
                    .map(move |result| result.and_then(|value| downcast::<T>(&key, value)))
                    .boxed(),
            )
        })
    }
}

/// The accessors produced by [`StoreBinding::register_all`].
pub struct BoundResources<A, T> {
    resources: HashMap<String, Resource<A, T>>,
}

impl<A, T> BoundResources<A, T> {
    pub(crate) fn new(resources: HashMap<String, Resource<A, T>>) -> Self {
        Self { resources }
    }

    /// Returns the accessor registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Resource<A, T>> {
        self.resources.get(name)
    }

    /// Returns every registered name.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Iterates over `(name, accessor)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resource<A, T>)> {
        self.resources.iter().map(|(name, res)| (name.as_str(), res))
    }

    /// Returns the number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
