//! Reducer wrapping for optimistic state tracking.
//!
//! A base reducer describes the application's own state transitions. Wrapping
//! it in [`OptimisticReducer`] lifts it to operate on [`OptimisticState`] and
//! teaches it the two reserved control actions: forced replacement on
//! rollback, and raising the optimistic flag. The base reducer never sees
//! either one, and never sees the flag.

use crate::types::{OptimisticState, StoreAction};

/// A pure state transition: consume the current state, produce the next.
///
/// Implemented for any `Fn(S, &A) -> S`, so plain functions and closures
/// work directly. Reducers must not dispatch; the store holds its state lock
/// across the reduce.
pub trait Reducer<S, A> {
    /// Apply `action` to `state`, returning the next state.
    fn reduce(&self, state: S, action: &A) -> S;
}

impl<S, A, F> Reducer<S, A> for F
where
    F: Fn(S, &A) -> S,
{
    fn reduce(&self, state: S, action: &A) -> S {
        self(state, action)
    }
}

/// Wraps a base reducer so it participates in optimistic tracking.
///
/// On a plain action the wrapped state is taken apart, the base reducer runs
/// on the bare value, and the flag is carried over unchanged. On the two
/// control actions the base reducer is bypassed entirely.
pub struct OptimisticReducer<R> {
    base: R,
}

impl<R> OptimisticReducer<R> {
    /// Wrap a base reducer.
    pub fn new(base: R) -> Self {
        Self { base }
    }
}

impl<S, A, R> Reducer<OptimisticState<S>, StoreAction<S, A>> for OptimisticReducer<R>
where
    S: Clone,
    R: Reducer<S, A>,
{
    fn reduce(
        &self,
        state: OptimisticState<S>,
        action: &StoreAction<S, A>,
    ) -> OptimisticState<S> {
        match action {
            // Forced replacement: the carried save point becomes the state,
            // flag included. The base reducer is not consulted.
            StoreAction::Rollback(save_point) => save_point.clone(),

            StoreAction::Mark => {
                // An already-flagged state passes through unchanged.
                if state.optimistic {
                    state
                } else {
                    OptimisticState {
                        optimistic: true,
                        ..state
                    }
                }
            }

            StoreAction::Plain(action) => {
                let OptimisticState { value, optimistic } = state;
                OptimisticState {
                    value: self.base.reduce(value, action),
                    optimistic,
                }
            }
        }
    }
}
