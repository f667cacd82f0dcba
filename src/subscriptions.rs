//! Subscriptions for observing dispatches as they happen.
//!
//! Subscribers receive every dispatch that passes their filter over a
//! bounded channel. A subscriber that stops draining its channel is dropped
//! rather than allowed to stall the dispatching thread.

use crate::types::{OptimisticState, StoreAction};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-subscription settings.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Events buffered before the subscriber is dropped. Default 1000.
    pub buffer_size: usize,

    /// Which dispatches to deliver.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
///
/// The default delivers plain actions whether or not they changed state,
/// and skips the control actions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Deliver the control actions (mark, rollback) as well as plain ones.
    pub include_control: bool,

    /// Only deliver dispatches that changed state.
    pub changed_only: bool,
}

impl SubscriptionFilter {
    /// Every dispatch, control actions included.
    pub fn all() -> Self {
        Self {
            include_control: true,
            changed_only: false,
        }
    }

    /// Only dispatches that changed state, control actions included.
    pub fn changes() -> Self {
        Self {
            include_control: true,
            changed_only: true,
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent<S, A> {
    /// An action went through the store's reducer.
    Dispatched {
        /// The action as dispatched.
        action: StoreAction<S, A>,
        /// State after the reduce.
        state: OptimisticState<S>,
        /// Whether the reduce changed state, by equality.
        changed: bool,
    },

    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

/// What ended a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The subscriber's buffer filled up.
    BufferOverflow,
    /// The subscription was explicitly removed.
    Unsubscribed,
}

/// Identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Caller's end of a subscription.
pub struct SubscriptionHandle<S, A> {
    pub id: SubscriptionId,
    /// Events arrive here.
    pub receiver: crossbeam_channel::Receiver<StoreEvent<S, A>>,
}

impl<S, A> SubscriptionHandle<S, A> {
    /// Next event, blocking.
    pub fn recv(&self) -> Result<StoreEvent<S, A>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Next event if one is already queued.
    pub fn try_recv(&self) -> Result<StoreEvent<S, A>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Next event, waiting at most `timeout`.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent<S, A>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Sender side of one subscription.
struct Subscription<S, A> {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent<S, A>>,
}

impl<S, A> Subscription<S, A> {
    /// Deliver one event. False means the subscriber could not take it and
    /// is to be evicted.
    fn try_send(&self, event: StoreEvent<S, A>) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Whether this subscription wants the dispatch.
    fn matches(&self, action: &StoreAction<S, A>, changed: bool) -> bool {
        if !self.config.filter.include_control && !action.is_plain() {
            return false;
        }
        if self.config.filter.changed_only && !changed {
            return false;
        }
        true
    }
}

/// Tracks subscribers and fans dispatch events out to them.
pub struct SubscriptionManager<S, A> {
    /// Live subscriptions keyed by id.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription<S, A>>>,
    /// Backing counter for subscription ids.
    next_id: AtomicU64,
}

impl<S, A> SubscriptionManager<S, A> {
    /// Create an empty subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a subscription.
    ///
    /// Returns a handle for receiving events. Delivery starts with the next
    /// dispatch; there is no historical replay.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle<S, A> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Remove a subscription, leaving a drop notice on its channel.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Best effort; the receiver may already be gone.
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Fan a dispatch out to matching subscriptions, evicting any that
    /// cannot receive.
    pub fn broadcast_dispatch(
        &self,
        action: &StoreAction<S, A>,
        state: &OptimisticState<S>,
        changed: bool,
    ) where
        S: Clone,
        A: Clone,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.matches(action, changed) {
                    let event = StoreEvent::Dispatched {
                        action: action.clone(),
                        state: state.clone(),
                        changed,
                    };
                    if !sub.try_send(event) {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::debug!("Dropped slow subscriber {}", id.0);
                    // The notice itself may not fit; the eviction stands
                    // either way.
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl<S, A> Default for SubscriptionManager<S, A> {
    fn default() -> Self {
        Self::new()
    }
}
