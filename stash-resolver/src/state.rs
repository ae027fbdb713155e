//! Resolver state and its observers.

use tokio::sync::watch;

use stash_core::error::{Result, StashError};

/// Where a consumer is in its fetch lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No resolution has started yet.
    Uninitialized,
    /// Waiting on a promise.
    Fetching,
    /// Data is available.
    Resolved,
    /// The producer rejected.
    Failed,
}

impl Phase {
    /// Phase of a started consumer, from its fetching flag and whether it holds an error.
    pub fn of(is_fetching: bool, failed: bool) -> Self {
        if is_fetching {
            Phase::Fetching
        } else if failed {
            Phase::Failed
        } else {
            Phase::Resolved
        }
    }
}

/// Per-consumer view of a promise.
#[derive(Clone, Debug)]
pub struct ResolverState<T> {
    /// True until the current promise settles
    pub is_fetching: bool,
    /// The resolved value, if any
    pub data: Option<T>,
    /// The producer's rejection, if the current promise failed
    pub error: Option<StashError>,
}

impl<T> ResolverState<T> {
    /// The state of a consumer waiting on its first value.
    pub fn fetching() -> Self {
        Self {
            is_fetching: true,
            data: None,
            error: None,
        }
    }

    pub(crate) fn settled(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                is_fetching: false,
                data: Some(value),
                error: None,
            },
            Err(err) => Self {
                is_fetching: false,
                data: None,
                error: Some(err),
            },
        }
    }

    /// Returns the lifecycle phase implied by this state.
    ///
    /// A state never reports [`Phase::Uninitialized`]; only the resolver
    /// knows whether it has started.
    pub fn phase(&self) -> Phase {
        Phase::of(self.is_fetching, self.error.is_some())
    }

    /// Converts a settled state into its result.
    ///
    /// Returns `None` while fetching.
    pub fn into_result(self) -> Option<Result<T>> {
        if self.is_fetching {
            return None;
        }
        match (self.data, self.error) {
            (_, Some(err)) => Some(Err(err)),
            (Some(value), None) => Some(Ok(value)),
            (None, None) => None,
        }
    }
}

impl<T> Default for ResolverState<T> {
    fn default() -> Self {
        Self::fetching()
    }
}

/// Shared slot behind a resolver's watch channel.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    /// Bumped each time a new promise starts; results carry the value they started with
    pub(crate) generation: u64,
    pub(crate) detached: bool,
    pub(crate) state: ResolverState<T>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            detached: false,
            state: ResolverState::fetching(),
        }
    }
}

/// Observes a resolver's state transitions.
pub struct StateReceiver<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> StateReceiver<T> {
    pub(crate) fn new(rx: watch::Receiver<Slot<T>>) -> Self {
        Self { rx }
    }

    /// Returns the latest state and marks it seen.
    pub fn state(&mut self) -> ResolverState<T> {
        self.rx.borrow_and_update().state.clone()
    }

    /// Waits for the next state transition.
    pub async fn changed(&mut self) -> Result<ResolverState<T>> {
        self.rx
            .changed()
            .await
            .map_err(|_| StashError::InternalError("resolver dropped".into()))?;
        Ok(self.state())
    }

    /// Waits until the current promise settles.
    ///
    /// Never returns for a consumer whose producer stays not ready.
    pub async fn settled(&mut self) -> Result<ResolverState<T>> {
        loop {
            let state = self.state();
            if !state.is_fetching {
                return Ok(state);
            }
            self.changed().await?;
        }
    }
}
