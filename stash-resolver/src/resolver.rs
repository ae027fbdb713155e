//! Promise resolution for a single consumer.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use stash_core::error::Result;

use crate::state::{Phase, ResolverState, Slot, StateReceiver};

/// Outcome of a [`PromiseResolver::trigger`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A new promise is being awaited.
    Started,
    /// The signal matches the last applied one; nothing to do.
    Unchanged,
    /// The producer had no data yet; state left untouched.
    NotReady,
    /// The consumer is torn down; nothing to do.
    Detached,
    /// No Tokio runtime to await the promise on; state left untouched.
    NoRuntime,
}

/// Resolves a producer's promise once per change signal.
///
/// Not shared between consumers: each consumer owns one resolver and one
/// [`CancellationToken`] describing its lifetime.
///
/// # Ordering
///
/// Every started promise is tagged with a generation. A settled result is
/// applied only if its generation is still the newest and the consumer is
/// still live; otherwise it is dropped silently.
pub struct PromiseResolver<T, S = u64> {
    slot: Arc<watch::Sender<Slot<T>>>,
    /// Last signal a promise was started for
    last_signal: Mutex<Option<S>>,
}

impl<T, S> PromiseResolver<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: PartialEq,
{
    /// Creates a resolver in the initial fetching state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::new());
        Self {
            slot: Arc::new(tx),
            last_signal: Mutex::new(None),
        }
    }

    /// Resolves `producer` for `signal` and returns the current state.
    ///
    /// See [`PromiseResolver::trigger`].
    pub fn resolve<F, Fut>(&self, signal: S, token: &CancellationToken, producer: F) -> ResolverState<T>
    where
        F: FnOnce() -> Option<Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.trigger(signal, token, producer);
        self.state()
    }

    /// Starts resolving `producer` if `signal` differs from the last applied one.
    ///
    /// A producer returning `None` leaves the state untouched and does not
    /// consume the signal, so the next call with the same signal asks again.
    /// Otherwise the state resets to fetching and the promise is awaited on a
    /// spawned task; `token` cancelling first discards the result.
    ///
    /// Outside a Tokio runtime nothing is started and the producer is not
    /// invoked; the call reports [`Resolution::NoRuntime`].
    pub fn trigger<F, Fut>(&self, signal: S, token: &CancellationToken, producer: F) -> Resolution
    where
        F: FnOnce() -> Option<Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if token.is_cancelled() || self.is_detached() {
            return Resolution::Detached;
        }

        let mut last = self.last_signal.lock();
        if last.as_ref() == Some(&signal) {
            return Resolution::Unchanged;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No Tokio runtime, resolution not started");
            return Resolution::NoRuntime;
        };

        let Some(fut) = producer() else {
            trace!("Producer not ready, state untouched");
            return Resolution::NotReady;
        };
        *last = Some(signal);

        let mut generation = 0;
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            generation = slot.generation;
            slot.state = ResolverState::fetching();
        });
        drop(last);

        debug!(generation, "Resolution started");

        let slot = Arc::clone(&self.slot);
        let token = token.clone();
        runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!(generation, "Consumer torn down, result discarded");
                    return;
                }
                result = fut => result,
            };

            slot.send_if_modified(|slot| {
                if slot.detached || token.is_cancelled() {
                    trace!(generation, "Consumer torn down, result discarded");
                    return false;
                }
                if slot.generation != generation {
                    trace!(generation, current = slot.generation, "Superseded result discarded");
                    return false;
                }
                slot.state = ResolverState::settled(result);
                true
            });
        });

        Resolution::Started
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> ResolverState<T> {
        self.slot.borrow().state.clone()
    }

    /// Returns the lifecycle phase.
    pub fn phase(&self) -> Phase {
        let slot = self.slot.borrow();
        if slot.generation == 0 {
            Phase::Uninitialized
        } else {
            slot.state.phase()
        }
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> StateReceiver<T> {
        StateReceiver::new(self.slot.subscribe())
    }

    /// Marks the consumer torn down.
    ///
    /// Pending results are discarded and later triggers do nothing.
    pub fn detach(&self) {
        self.slot.send_if_modified(|slot| {
            slot.detached = true;
            false
        });
    }

    /// Returns true once [`PromiseResolver::detach`] has been called.
    pub fn is_detached(&self) -> bool {
        self.slot.borrow().detached
    }
}

impl<T, S> Default for PromiseResolver<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};
    use stash_core::error::StashError;
    use tokio::sync::oneshot;
    use tokio_test::assert_pending;

    fn ready(value: u32) -> Option<BoxFuture<'static, Result<u32>>> {
        Some(async move { Ok(value) }.boxed())
    }

    fn slow(rx: oneshot::Receiver<u32>) -> Option<BoxFuture<'static, Result<u32>>> {
        Some(async move { rx.await.map_err(StashError::rejected) }.boxed())
    }

    async fn let_tasks_run() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_resolves_once_per_signal() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let produce = || {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(10)
        };

        assert_eq!(resolver.phase(), Phase::Uninitialized);

        let first = resolver.resolve(1, &token, produce);
        assert!(first.is_fetching);
        assert!(first.data.is_none());

        let state = resolver.subscribe().settled().await.unwrap();
        assert!(!state.is_fetching);
        assert_eq!(state.data, Some(10));

        assert_eq!(resolver.trigger(1, &token, produce), Resolution::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.phase(), Phase::Resolved);
    }

    #[tokio::test]
    async fn test_new_signal_resets_state() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();

        resolver.trigger(1, &token, || ready(1));
        resolver.subscribe().settled().await.unwrap();

        let (_tx, rx) = oneshot::channel();
        let state = resolver.resolve(2, &token, || slow(rx));
        assert!(state.is_fetching);
        assert!(state.data.is_none());
    }

    #[tokio::test]
    async fn test_not_ready_leaves_state_untouched() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();

        let outcome = resolver.trigger(1, &token, || None::<BoxFuture<'static, Result<u32>>>);
        assert_eq!(outcome, Resolution::NotReady);
        assert_eq!(resolver.phase(), Phase::Uninitialized);

        let state = resolver.state();
        assert!(state.is_fetching);
        assert!(state.data.is_none());

        // Same signal, now ready: the signal was not consumed.
        assert_eq!(resolver.trigger(1, &token, || ready(4)), Resolution::Started);
        let state = resolver.subscribe().settled().await.unwrap();
        assert_eq!(state.data, Some(4));
    }

    #[tokio::test]
    async fn test_teardown_before_settle_discards_result() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        resolver.trigger(1, &token, || slow(rx));
        token.cancel();
        let _ = tx.send(5);
        let_tasks_run().await;

        let state = resolver.state();
        assert!(state.is_fetching);
        assert!(state.data.is_none());
        assert_eq!(resolver.trigger(2, &token, || ready(6)), Resolution::Detached);
    }

    #[tokio::test]
    async fn test_detach_discards_result() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        resolver.trigger(1, &token, || slow(rx));
        resolver.detach();
        tx.send(5).unwrap();
        let_tasks_run().await;

        assert!(resolver.is_detached());
        assert!(resolver.state().data.is_none());
    }

    #[tokio::test]
    async fn test_superseded_result_is_not_applied() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let (old_tx, old_rx) = oneshot::channel();

        resolver.trigger(1, &token, || slow(old_rx));
        resolver.trigger(2, &token, || ready(2));
        let state = resolver.subscribe().settled().await.unwrap();
        assert_eq!(state.data, Some(2));

        old_tx.send(1).unwrap();
        let_tasks_run().await;

        assert_eq!(resolver.state().data, Some(2));
    }

    #[tokio::test]
    async fn test_rejection_reaches_consumer() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();

        resolver.trigger(1, &token, || {
            Some(async { Err::<u32, _>(StashError::rejected_msg("backend down")) })
        });

        let state = resolver.subscribe().settled().await.unwrap();
        assert_eq!(state.phase(), Phase::Failed);
        assert!(state.error.unwrap().is_producer_error());
        assert_eq!(resolver.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn test_subscriber_sees_transitions() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let mut rx = resolver.subscribe();
        let (tx, slow_rx) = oneshot::channel();

        resolver.trigger(1, &token, || slow(slow_rx));
        let fetching = rx.changed().await.unwrap();
        assert!(fetching.is_fetching);

        tx.send(8).unwrap();
        let done = rx.changed().await.unwrap();
        assert_eq!(done.data, Some(8));
    }

    #[tokio::test]
    async fn test_unchanged_signal_does_not_notify() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();

        resolver.trigger(1, &token, || ready(1));
        let mut rx = resolver.subscribe();
        rx.settled().await.unwrap();

        assert_eq!(resolver.trigger(1, &token, || ready(2)), Resolution::Unchanged);
        let mut next = tokio_test::task::spawn(rx.changed());
        assert_pending!(next.poll());
    }

    #[test]
    fn test_outside_runtime_starts_nothing() {
        let resolver = PromiseResolver::<u32>::new();
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let outcome = resolver.trigger(1, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            ready(1)
        });

        assert_eq!(outcome, Resolution::NoRuntime);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.phase(), Phase::Uninitialized);
        assert!(resolver.state().is_fetching);
    }
}
