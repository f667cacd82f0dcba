//! # Retcon
//!
//! An optimistic transaction layer for unidirectional state containers:
//! apply tentative changes immediately, and when the authoritative outcome
//! arrives, either let them stand or surgically unwind them while keeping
//! everything that happened in between.
//!
//! ## Core Concepts
//!
//! - **Save point**: Snapshot of state, taken just before the first
//!   optimistic action of a window
//! - **Recorded actions**: Every action dispatched while a save point is
//!   active, tagged with the transaction it was posted under (if any)
//! - **Rollback**: Force state back to the save point, discard the
//!   cancelled transaction's actions, replay the rest in order
//! - **Optimistic flag**: Carried beside the state so consumers can tell
//!   tentative from settled
//!
//! ## Example
//!
//! ```ignore
//! use retcon::{OptimisticManager, OptimisticReducer, Store, StoreAction};
//!
//! let reducer = OptimisticReducer::new(|mut items: Vec<String>, action: &String| {
//!     items.push(action.clone());
//!     items
//! });
//! let store = Store::new(reducer, Vec::new());
//! let manager = OptimisticManager::new(&store);
//!
//! // Tentatively show the new item while the request is in flight.
//! let transaction = manager.begin();
//! store.dispatch(manager.post(StoreAction::Plain("item (sending)".into()), Some(transaction)));
//!
//! // Unrelated activity keeps flowing through as usual.
//! store.dispatch(manager.post(StoreAction::Plain("other".into()), None));
//!
//! // The request settled: dispatch the real item, unwind the guess.
//! store.dispatch(manager.post(StoreAction::Plain("item".into()), None));
//! manager.rollback(Some(transaction))?;
//! ```

pub mod error;
pub mod manager;
pub mod reducer;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use manager::{ManagerStats, OptimisticManager, RollbackReport, StoreAccess};
pub use reducer::{OptimisticReducer, Reducer};
pub use store::Store;
pub use subscriptions::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
