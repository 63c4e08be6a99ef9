//! Reactive Context
//!
//! The reactive context tracks which observer is currently running. This
//! enables automatic dependency tracking: when an observable is read, the
//! observer on top of the stack is recorded as one of its observers.
//!
//! # Implementation
//!
//! Each graph owns an observer stack. Running a computation or reaction
//! pushes its id; `untracked` pushes an empty slot so reads inside are not
//! attributed to anyone. Disposing a reaction while it is on the stack
//! empties its slot instead of removing it, so the positions of enclosing
//! observers don't shift.
//!
//! [`ReactiveContext`] is the guard that pops the stack, which keeps it
//! balanced even if the computation panics.

use smallvec::SmallVec;

use super::runtime::Graph;
use crate::error::GraphError;
use crate::graph::NodeId;

/// Stack of running observers, innermost last.
#[derive(Debug, Default)]
pub(crate) struct ObserverStack {
    slots: SmallVec<[Option<NodeId>; 8]>,
}

impl ObserverStack {
    pub fn push(&mut self, slot: Option<NodeId>) {
        self.slots.push(slot);
    }

    pub fn pop(&mut self) -> Option<Option<NodeId>> {
        self.slots.pop()
    }

    /// The observer that reads are currently attributed to.
    pub fn top(&self) -> Option<NodeId> {
        self.slots.last().copied().flatten()
    }

    /// The raw top slot, which may be empty.
    pub fn top_slot(&self) -> Option<Option<NodeId>> {
        self.slots.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Empty every slot held by `node_id`.
    pub fn detach(&mut self, node_id: NodeId) {
        for slot in self.slots.iter_mut() {
            if *slot == Some(node_id) {
                *slot = None;
            }
        }
    }

    pub fn running(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.iter().filter_map(|slot| *slot)
    }
}

/// Guard for one observer run or untracked section.
///
/// Call [`ReactiveContext::exit`] to leave the context and observe any
/// stack-discipline error. If the guard is dropped instead (for example
/// while unwinding) the context is still left and errors are logged.
pub(crate) struct ReactiveContext<'g> {
    graph: &'g Graph,
    node: Option<NodeId>,
    active: bool,
}

impl<'g> ReactiveContext<'g> {
    /// Enter a new reactive context for the given observer.
    ///
    /// The observer's previous dependencies are dropped; everything it reads
    /// until the context exits becomes its new dependency set.
    pub fn enter(graph: &'g Graph, node: NodeId) -> Self {
        graph.start_observer(node);
        Self {
            graph,
            node: Some(node),
            active: true,
        }
    }

    /// Enter a context in which reads are not tracked.
    pub fn untracked(graph: &'g Graph) -> Self {
        graph.push_untracked();
        Self {
            graph,
            node: None,
            active: true,
        }
    }

    /// Leave the context.
    pub fn exit(mut self) -> Result<(), GraphError> {
        self.active = false;
        self.leave()
    }

    fn leave(&self) -> Result<(), GraphError> {
        match self.node {
            Some(node) => self.graph.end_observer(node),
            None => {
                self.graph.pop_untracked();
                Ok(())
            }
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.leave() {
            tracing::warn!(node = ?self.node, error = %err, "reactive context left out of order");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_tracks_top_observer() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        let mut stack = ObserverStack::default();

        assert!(stack.top().is_none());

        stack.push(Some(id1));
        assert_eq!(stack.top(), Some(id1));

        stack.push(Some(id2));
        assert_eq!(stack.top(), Some(id2));

        stack.pop();
        assert_eq!(stack.top(), Some(id1));
    }

    #[test]
    fn untracked_slot_hides_enclosing_observer() {
        let id = NodeId::new();
        let mut stack = ObserverStack::default();

        stack.push(Some(id));
        stack.push(None);

        assert!(stack.top().is_none());
        assert_eq!(stack.top_slot(), Some(None));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn detach_keeps_positions() {
        let outer = NodeId::new();
        let inner = NodeId::new();
        let mut stack = ObserverStack::default();

        stack.push(Some(outer));
        stack.push(Some(inner));
        stack.detach(inner);

        assert_eq!(stack.len(), 2);
        assert!(stack.top().is_none());
        assert_eq!(stack.running().collect::<Vec<_>>(), vec![outer]);
    }

    #[test]
    fn context_guard_restores_stack() {
        let graph = Graph::new();
        assert!(!graph.is_tracking());

        {
            let _ctx = ReactiveContext::untracked(&graph);
            assert!(!graph.is_tracking());
        }

        assert!(!graph.is_tracking());
        assert_eq!(graph.stack_depth(), 0);
    }
}
