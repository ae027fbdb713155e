//! # Stash Cache
//!
//! Keyed cache of in-flight or resolved promises.
//!
//! Each key holds one shared future. Concurrent requesters of a missing key
//! receive the same handle, so the producer runs once. Overwrites and removals
//! bump a per-key version that consumers subscribe to.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod cache;

pub use cache::{CacheConfig, CacheStats, KeyedCache, PromiseHandle};
