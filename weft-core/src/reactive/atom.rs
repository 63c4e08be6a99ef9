//! Atoms
//!
//! An atom is an observable with no value of its own. Adapters that keep
//! their state elsewhere (a map, a vector, an external resource) use one to
//! tell the graph when that state is read and when it changes.

use std::sync::{Arc, Weak};

use super::runtime::Graph;
use super::subscriber::Subscription;
use crate::error::GraphError;
use crate::graph::{NodeId, NodeKind, Reactive};

struct AtomInner {
    graph: Graph,
    id: NodeId,
}

// With no value to compare, every reported change is genuine.
impl Reactive for AtomInner {}

impl Drop for AtomInner {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// A value-less observable.
#[derive(Clone)]
pub struct Atom {
    inner: Arc<AtomInner>,
}

impl Atom {
    pub fn new(graph: &Graph) -> Self {
        let inner = Arc::new(AtomInner {
            graph: graph.clone(),
            id: NodeId::new(),
        });
        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn Reactive> = weak;
        graph.register(inner.id, NodeKind::Cell, handle);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Record a read. Returns whether the atom is observed afterwards.
    pub fn report_observed(&self) -> bool {
        self.inner.graph.report_observed(self.inner.id);
        self.inner.graph.is_observed(self.inner.id)
    }

    /// Report a change. Nothing happens while the atom is unobserved.
    pub fn report_changed(&self) -> Result<(), GraphError> {
        if !self.inner.graph.is_observed(self.inner.id) {
            return Ok(());
        }
        self.inner.graph.report_changed(self.inner.id, None)
    }

    /// Subscribe to the atom becoming observed or unobserved.
    pub fn on_observed_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner
            .graph
            .on_observed_state_change(self.inner.id, callback)
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom").field("id", &self.inner.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unobserved_atom_ignores_changes() {
        let graph = Graph::new();
        let atom = Atom::new(&graph);

        assert!(!atom.report_observed());
        atom.report_changed().unwrap();
        assert!(!graph.is_in_batch());
    }
}
