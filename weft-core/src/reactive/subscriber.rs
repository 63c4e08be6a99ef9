//! Subscriber types for the reactive system.
//!
//! Client layers subscribe to two kinds of graph events: a node becoming
//! observed or unobserved, and the end of a settlement that ran at least
//! one reaction. Each subscription is owned by a [`Subscription`] handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::runtime::Graph;
use crate::graph::NodeId;

/// Callback for become-observed (`true`) / become-unobserved (`false`).
pub(crate) type ObservedCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback fired after a settlement ran reactions.
pub(crate) type CompleteCallback = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a subscription is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionTarget {
    ObservedState(NodeId),
    ReactionsComplete,
}

/// Handle to a registered callback.
///
/// Dropping the handle unsubscribes the callback.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    graph: Graph,
    id: SubscriptionId,
    target: SubscriptionTarget,
}

impl Subscription {
    pub(crate) fn new(graph: Graph, id: SubscriptionId, target: SubscriptionTarget) -> Self {
        Self { graph, id, target }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.graph.unsubscribe(self.id, self.target);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn subscription_ids_are_unique() {
        let id1 = SubscriptionId::new();
        let id2 = SubscriptionId::new();
        let id3 = SubscriptionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let graph = Graph::new();
        let called = Arc::new(AtomicI32::new(0));
        let called_clone = called.clone();

        let subscription = graph.on_reactions_complete(move || {
            called_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(graph.reactions_complete_subscribers(), 1);

        subscription.unsubscribe();
        assert_eq!(graph.reactions_complete_subscribers(), 0);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
