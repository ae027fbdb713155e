//! Common traits for stash.
//!
//! These traits define the interfaces that resource implementations can satisfy,
//! so a store can host closures and full service objects alike.

use async_trait::async_trait;

use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE PRODUCER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Interface for an asynchronous, argument-taking resource.
///
/// Implementations might wrap:
/// - An HTTP client (fetch a user by id)
/// - A database handle (load a page of rows)
/// - Another in-process service
///
/// Retries and backoff are the implementation's concern; a returned error is
/// cached and replayed to every consumer of the key until it is invalidated.
#[async_trait]
pub trait ResourceProducer<A>: Send + Sync + 'static
where
    A: Send + 'static,
{
    /// The value produced for a given argument list.
    type Output: Send + Sync + 'static;

    /// Returns false while the resource cannot be fetched for `args` yet.
    ///
    /// A not-ready resource stores nothing and leaves consumers fetching.
    fn is_ready(&self, _args: &A) -> bool {
        true
    }

    /// Produces the value for `args`.
    async fn fetch(&self, args: A) -> Result<Self::Output>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StashError;

    struct Doubler;

    #[async_trait]
    impl ResourceProducer<u32> for Doubler {
        type Output = u64;

        fn is_ready(&self, args: &u32) -> bool {
            *args != 0
        }

        async fn fetch(&self, args: u32) -> Result<u64> {
            if args > 1000 {
                return Err(StashError::rejected_msg("too large"));
            }
            Ok(u64::from(args) * 2)
        }
    }

    #[tokio::test]
    async fn test_producer_fetch() {
        let producer = Doubler;
        assert_eq!(producer.fetch(21).await.unwrap(), 42);
        assert!(producer.fetch(5000).await.unwrap_err().is_producer_error());
    }

    #[test]
    fn test_producer_readiness() {
        let producer = Doubler;
        assert!(!producer.is_ready(&0));
        assert!(producer.is_ready(&1));
    }
}
