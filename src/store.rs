//! Main Store struct tying reducer, state, and subscriptions together.

use crate::manager::StoreAccess;
use crate::reducer::Reducer;
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{OptimisticState, StoreAction};
use parking_lot::Mutex;

/// A minimal synchronous unidirectional state container.
///
/// Provides a unified interface for:
/// - Holding the wrapped state behind a lock
/// - Running every dispatched action through the reducer
/// - Broadcasting each dispatch to subscribers
///
/// This is the reference `StoreAccess` implementation the optimistic manager
/// plugs into; applications with their own container implement the trait
/// instead. The reducer is expected to be the base reducer wrapped in
/// `OptimisticReducer`, so the two control actions are understood.
///
/// Reducers must be pure. Dispatching from inside a reduce deadlocks: the
/// state lock is held across the call.
pub struct Store<S, A, R> {
    /// Current wrapped state.
    state: Mutex<OptimisticState<S>>,

    /// The reducer every action runs through.
    reducer: R,

    /// Dispatch observers.
    subscriptions: SubscriptionManager<S, A>,
}

impl<S, A, R> Store<S, A, R>
where
    S: Clone + PartialEq,
    A: Clone,
    R: Reducer<OptimisticState<S>, StoreAction<S, A>>,
{
    /// Create a store from a reducer and an initial application state.
    ///
    /// The state starts with the optimistic flag cleared.
    pub fn new(reducer: R, initial: S) -> Self {
        Self::with_state(reducer, OptimisticState::new(initial))
    }

    /// Create a store resuming from a previously captured wrapped state.
    pub fn with_state(reducer: R, state: OptimisticState<S>) -> Self {
        Self {
            state: Mutex::new(state),
            reducer,
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Current state, including the optimistic flag.
    pub fn state(&self) -> OptimisticState<S> {
        self.state.lock().clone()
    }

    /// Run an action through the reducer and notify subscribers.
    ///
    /// Change detection compares the new state against the old by equality,
    /// so a reduce that rebuilds an equal value still counts as unchanged.
    pub fn dispatch(&self, action: StoreAction<S, A>) {
        let (state, changed) = {
            let mut guard = self.state.lock();
            let next = self.reducer.reduce(guard.clone(), &action);
            let changed = next != *guard;
            *guard = next;
            (guard.clone(), changed)
        };

        tracing::trace!(
            "Dispatched {} action (changed: {}, optimistic: {})",
            action.control_type().unwrap_or("plain"),
            changed,
            state.optimistic
        );

        self.subscriptions.broadcast_dispatch(&action, &state, changed);
    }

    /// Subscribe to dispatch events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle<S, A> {
        self.subscriptions.subscribe(config)
    }

    /// Unsubscribe and notify the subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id)
    }

    /// Active subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }
}

impl<S, A, R> StoreAccess for Store<S, A, R>
where
    S: Clone + PartialEq,
    A: Clone,
    R: Reducer<OptimisticState<S>, StoreAction<S, A>>,
{
    type State = S;
    type Action = A;

    fn state(&self) -> OptimisticState<S> {
        Store::state(self)
    }

    fn dispatch(&self, action: StoreAction<S, A>) {
        Store::dispatch(self, action)
    }
}
