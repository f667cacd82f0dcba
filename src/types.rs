//! Core types for the optimistic layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved action type for forcing state back to a save point.
pub const ROLLBACK_TYPE: &str = "@@optimistic/ROLLBACK";

/// Reserved action type for raising the optimistic flag.
pub const MARK_TYPE: &str = "@@optimistic/MARK";

/// Identifier for an optimistic transaction.
///
/// Ids are plain tags rather than registry entries: the manager records
/// nothing when one is created, and any id may be posted under or rolled
/// back. `OptimisticManager::begin` hands out fresh ones from a per-manager
/// counter; ids minted elsewhere work just as well as long as the
/// application keeps them distinct.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application state paired with the optimistic flag.
///
/// The flag is true while the effects of at least one uncommitted optimistic
/// transaction are folded into `value`. The reducer wrapper maintains it;
/// base reducers never see it.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptimisticState<S> {
    /// The application's own state.
    pub value: S,

    /// True while uncommitted optimistic effects are reflected in `value`.
    pub optimistic: bool,
}

impl<S> OptimisticState<S> {
    /// Wrap an application state with the flag cleared.
    pub fn new(value: S) -> Self {
        Self {
            value,
            optimistic: false,
        }
    }
}

/// An action as the optimistic layer sees it: either an application action
/// or one of the two reserved control actions.
///
/// Control actions are produced by the manager and consumed by the reducer
/// wrapper. They pass through `post` untouched and are never recorded for
/// replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoreAction<S, A> {
    /// An ordinary application action.
    Plain(A),

    /// Raise the optimistic flag.
    #[serde(rename = "@@optimistic/MARK")]
    Mark,

    /// Replace state wholesale with the carried save point.
    #[serde(rename = "@@optimistic/ROLLBACK")]
    Rollback(OptimisticState<S>),
}

impl<S, A> StoreAction<S, A> {
    /// True for application actions, false for the two control actions.
    pub fn is_plain(&self) -> bool {
        matches!(self, StoreAction::Plain(_))
    }

    /// The reserved type string of a control action, None for plain ones.
    pub fn control_type(&self) -> Option<&'static str> {
        match self {
            StoreAction::Plain(_) => None,
            StoreAction::Mark => Some(MARK_TYPE),
            StoreAction::Rollback(_) => Some(ROLLBACK_TYPE),
        }
    }
}
