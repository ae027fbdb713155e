//! # Stash Resolver
//!
//! Translates a promise into per-consumer `{is_fetching, data}` state.
//!
//! ## Features
//!
//! - **Signal-driven**: resolution reruns only when the change signal differs
//!   from the last one applied
//! - **Ordered**: a result belonging to a superseded signal is never applied
//! - **Teardown-safe**: once the consumer's cancellation token fires (or the
//!   resolver is detached) no state mutation happens
//!
//! ## Example
//!
//! ```rust,ignore
//! use stash_resolver::PromiseResolver;
//! use tokio_util::sync::CancellationToken;
//!
//! let resolver = PromiseResolver::<String, u64>::new();
//! let token = CancellationToken::new();
//!
//! resolver.resolve(1, &token, || Some(async { Ok("alice".to_string()) }));
//! let state = resolver.subscribe().settled().await?;
//! assert_eq!(state.data.as_deref(), Some("alice"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod resolver;
mod state;

pub use resolver::{PromiseResolver, Resolution};
pub use state::{Phase, ResolverState, StateReceiver};
pub use tokio_util::sync::CancellationToken;
