//! Transaction State
//!
//! Everything the controller tracks for the lifetime of one outermost
//! batch: nesting depths, the values observables held before they changed,
//! the computations that may be stale, and the reactions waiting to run.
//!
//! # Reaction Queue
//!
//! Reactions run in the order they were first queued. Queuing a reaction
//! that is already present moves it to the back. While the queue is being
//! drained, a reaction moved from a position the drain already passed is
//! visited again; the cursor is adjusted so that no other entry is skipped.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use super::node::{NodeId, Snapshot};

/// Insertion-ordered queue of reactions awaiting settlement.
#[derive(Debug, Default)]
pub struct ReactionQueue {
    entries: IndexSet<NodeId>,
    /// Index of the next entry to visit during a drain.
    next: usize,
}

impl ReactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reaction, moving it to the back if it is already queued.
    pub fn requeue(&mut self, node_id: NodeId) {
        self.remove(node_id);
        self.entries.insert(node_id);
    }

    /// Remove a reaction from the queue.
    pub fn remove(&mut self, node_id: NodeId) {
        if let Some(index) = self.entries.get_index_of(&node_id) {
            self.entries.shift_remove_index(index);
            if index < self.next {
                self.next -= 1;
            }
        }
    }

    /// Advance the drain cursor.
    pub fn next(&mut self) -> Option<NodeId> {
        let node_id = self.entries.get_index(self.next).copied()?;
        self.next += 1;
        Some(node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.entries.contains(&node_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next = 0;
    }
}

/// Transaction-scoped bookkeeping owned by the controller.
#[derive(Debug, Default)]
pub struct Transaction {
    pub batch_depth: usize,
    pub action_depth: usize,
    pub in_batch: bool,
    pub in_action: bool,

    /// Observables confirmed changed this transaction, with the value they
    /// held before the first change. Computations that were never derived
    /// have no snapshot.
    pub changed: HashMap<NodeId, Option<Snapshot>>,

    /// Observables whose change already propagated this transaction.
    pub propagated: HashSet<NodeId>,

    /// Computations reachable from a changed observable that have not been
    /// re-derived yet.
    pub potentially_stale: HashSet<NodeId>,

    pub queued: ReactionQueue,

    /// Computations derived during the current batch or derivation. Any of
    /// them left unobserved are torn down once that scope ends.
    pub invoked: IndexSet<NodeId>,

    /// Observables that lost their last observer while an observer was
    /// running. They are only reported unobserved once the stack empties,
    /// since the observer may read them again.
    pub potential_unobserved: IndexSet<NodeId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
        self.in_batch = true;
    }

    pub fn start_action(&mut self) {
        self.action_depth += 1;
        self.in_action = true;
        self.start_batch();
    }

    /// Forget a node that left the graph.
    pub fn forget(&mut self, node_id: NodeId) -> Option<Snapshot> {
        self.propagated.remove(&node_id);
        self.potentially_stale.remove(&node_id);
        self.queued.remove(node_id);
        self.invoked.shift_remove(&node_id);
        self.potential_unobserved.shift_remove(&node_id);
        self.changed.remove(&node_id).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(|_| NodeId::new()).collect()
    }

    fn drain(queue: &mut ReactionQueue) -> Vec<NodeId> {
        let mut visited = Vec::new();
        while let Some(id) = queue.next() {
            visited.push(id);
        }
        visited
    }

    #[test]
    fn queue_preserves_first_queued_order() {
        let nodes = ids(3);
        let mut queue = ReactionQueue::new();
        for id in &nodes {
            queue.requeue(*id);
        }
        assert_eq!(drain(&mut queue), nodes);
    }

    #[test]
    fn requeue_moves_entry_to_back() {
        let nodes = ids(3);
        let mut queue = ReactionQueue::new();
        for id in &nodes {
            queue.requeue(*id);
        }
        queue.requeue(nodes[0]);
        assert_eq!(drain(&mut queue), vec![nodes[1], nodes[2], nodes[0]]);
    }

    #[test]
    fn requeue_during_drain_revisits_without_skipping() {
        let nodes = ids(3);
        let mut queue = ReactionQueue::new();
        for id in &nodes {
            queue.requeue(*id);
        }

        assert_eq!(queue.next(), Some(nodes[0]));
        assert_eq!(queue.next(), Some(nodes[1]));

        // The entry being visited queues the first one again.
        queue.requeue(nodes[0]);

        assert_eq!(queue.next(), Some(nodes[2]));
        assert_eq!(queue.next(), Some(nodes[0]));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn requeue_of_current_entry_runs_it_again() {
        let nodes = ids(2);
        let mut queue = ReactionQueue::new();
        queue.requeue(nodes[0]);
        queue.requeue(nodes[1]);

        assert_eq!(queue.next(), Some(nodes[0]));
        queue.requeue(nodes[0]);

        assert_eq!(drain(&mut queue), vec![nodes[1], nodes[0]]);
    }

    #[test]
    fn clear_resets_cursor() {
        let nodes = ids(2);
        let mut queue = ReactionQueue::new();
        queue.requeue(nodes[0]);
        queue.next();
        queue.clear();

        queue.requeue(nodes[1]);
        assert_eq!(queue.next(), Some(nodes[1]));
    }

    #[test]
    fn action_nests_inside_batch_depth() {
        let mut txn = Transaction::new();
        txn.start_batch();
        txn.start_action();
        assert_eq!(txn.batch_depth, 2);
        assert_eq!(txn.action_depth, 1);
        assert!(txn.in_batch);
        assert!(txn.in_action);
    }

    #[test]
    fn forget_drops_every_reference() {
        let node = NodeId::new();
        let mut txn = Transaction::new();
        txn.propagated.insert(node);
        txn.potentially_stale.insert(node);
        txn.queued.requeue(node);
        txn.invoked.insert(node);
        txn.changed.insert(node, None);

        txn.forget(node);

        assert!(txn.propagated.is_empty());
        assert!(txn.potentially_stale.is_empty());
        assert!(txn.queued.is_empty());
        assert!(txn.invoked.is_empty());
        assert!(txn.changed.is_empty());
    }
}
