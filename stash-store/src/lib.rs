//! # Stash Store
//!
//! Named resource registration over a shared keyed promise cache.
//!
//! A [`StoreBinding`] hosts any number of named producers. Each producer is
//! exposed as a [`Resource`]; every [`Resource::access`] call creates a
//! [`CacheView`] consumer whose key is the resource name joined with its
//! rendered arguments. Consumers of one key share one in-flight fetch.
//!
//! Invalidation goes through the store's removal registry: any consumer can
//! call [`StoreBinding::clear_cache`] with the name and arguments of a key,
//! and every live consumer of that key refetches on its next read.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stash_store::StoreBinding;
//!
//! let store = StoreBinding::new();
//! let user = store.register("user", |id: u32| async move { fetch_user(id).await });
//!
//! let mut view = user.access(1)?;
//! assert!(view.current().is_fetching);
//!
//! let response = view.settled().await?;
//! println!("{:?}", response.data);
//!
//! store.clear_cache(&("user", 1))?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod config;
mod resource;
mod store;
mod view;

pub use config::StoreConfig;
pub use resource::{deferred_fn, producer_fn, resource_fn, BoundResources, Resource, ResourceFn};
pub use store::{RemovalHandle, StoreBinding};
pub use view::{CacheHandle, CacheResponse, CacheView};

pub use stash_cache::CacheStats;
pub use stash_core::{CacheKey, ResourceProducer, Result, StashError};
pub use stash_resolver::{CancellationToken, Phase};
