//! Graph Nodes
//!
//! This module defines the entries that live in the node arena and the
//! [`Reactive`] trait through which the graph talks to typed node handles.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;

use crate::error::GraphError;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A leaf value holder. Cells only have observers.
    Cell,

    /// A derived, cached value. Computations both observe and are observed.
    Computation,

    /// A terminal observer with a side-effecting callback. Reactions have
    /// dependencies but no observers.
    Reaction,
}

impl NodeKind {
    /// Whether nodes of this kind can be read by observers.
    pub fn is_observable(self) -> bool {
        matches!(self, Self::Cell | Self::Computation)
    }

    /// Whether nodes of this kind record the observables they read.
    pub fn is_observer(self) -> bool {
        matches!(self, Self::Computation | Self::Reaction)
    }
}

/// A type-erased value captured before a transaction changed it.
pub type Snapshot = Arc<dyn Any + Send + Sync>;

/// The graph's view of a typed node.
///
/// The arena only stores ids and edges; anything that needs the node's
/// value or callback goes through this trait. Every method has a default
/// so each node type implements only what its role needs.
pub trait Reactive: Send + Sync {
    /// Capture the current cached value, if any.
    fn snapshot(&self) -> Option<Snapshot> {
        None
    }

    /// Whether the current value equals `snapshot`.
    ///
    /// Computations may re-derive here. A missing snapshot never compares
    /// equal.
    fn equals_snapshot(&self, _snapshot: Option<&Snapshot>) -> Result<bool, GraphError> {
        Ok(false)
    }

    /// Drop any cached value and force the next read to re-derive.
    ///
    /// The dropped value is handed back so the caller can release it once
    /// the graph is unlocked.
    fn clear(&self) -> Option<Snapshot> {
        None
    }

    /// Run the node's side effect.
    fn react(&self) -> Result<(), GraphError> {
        Ok(())
    }
}

/// An entry in the node arena.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    keep_alive: bool,

    /// Nodes that read this node during their last run.
    observers: IndexSet<NodeId>,

    /// Nodes this node read during its last run.
    observing: IndexSet<NodeId>,

    handle: Weak<dyn Reactive>,
}

impl Node {
    /// Create a new arena entry backed by `handle`.
    pub fn new(id: NodeId, kind: NodeKind, handle: Weak<dyn Reactive>) -> Self {
        Self {
            id,
            kind,
            keep_alive: false,
            observers: IndexSet::new(),
            observing: IndexSet::new(),
            handle,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    /// Upgrade to the typed node, if it is still alive.
    pub fn handle(&self) -> Option<Arc<dyn Reactive>> {
        self.handle.upgrade()
    }

    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    pub fn observing(&self) -> &IndexSet<NodeId> {
        &self.observing
    }

    pub(crate) fn add_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.insert(node_id)
    }

    pub(crate) fn remove_observer(&mut self, node_id: NodeId) -> bool {
        self.observers.shift_remove(&node_id)
    }

    pub(crate) fn add_observing(&mut self, node_id: NodeId) -> bool {
        self.observing.insert(node_id)
    }

    pub(crate) fn remove_observing(&mut self, node_id: NodeId) -> bool {
        self.observing.shift_remove(&node_id)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("keep_alive", &self.keep_alive)
            .field("observers", &self.observers)
            .field("observing", &self.observing)
            .field("alive", &(self.handle.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl Reactive for Inert {}

    fn detached(kind: NodeKind) -> Node {
        let handle: Weak<dyn Reactive> = Weak::<Inert>::new();
        Node::new(NodeId::new(), kind, handle)
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn kinds_know_their_roles() {
        assert!(NodeKind::Cell.is_observable());
        assert!(!NodeKind::Cell.is_observer());
        assert!(NodeKind::Computation.is_observable());
        assert!(NodeKind::Computation.is_observer());
        assert!(!NodeKind::Reaction.is_observable());
        assert!(NodeKind::Reaction.is_observer());
    }

    #[test]
    fn edge_sets_keep_insertion_order() {
        let mut node = detached(NodeKind::Computation);
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        node.add_observer(b);
        node.add_observer(a);
        assert!(!node.add_observer(b));
        node.add_observer(c);

        let order: Vec<_> = node.observers().iter().copied().collect();
        assert_eq!(order, vec![b, a, c]);

        node.remove_observer(a);
        let order: Vec<_> = node.observers().iter().copied().collect();
        assert_eq!(order, vec![b, c]);
    }

    #[test]
    fn dropped_handle_does_not_upgrade() {
        let node = detached(NodeKind::Cell);
        assert!(node.handle().is_none());
    }
}
