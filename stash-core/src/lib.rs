//! # Stash Core
//!
//! Core keys, errors, and traits for the stash keyed promise cache.
//!
//! This crate provides the foundational building blocks used by all other stash crates:
//!
//! - **Keys**: Deterministic, join-based cache key derivation
//! - **Errors**: A cloneable error type that shared promises can replay
//! - **Constants**: Default separator and environment variable names
//! - **Traits**: The resource producer interface
//!
//! ## Example
//!
//! ```rust
//! use stash_core::CacheKey;
//!
//! let key = CacheKey::derive("user", &(1,)).unwrap();
//! assert_eq!(key.as_str(), "user_1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod key;
pub mod traits;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{Result, SharedError, StashError};
pub use key::CacheKey;
pub use traits::*;
