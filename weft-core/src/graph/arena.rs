//! Node Arena
//!
//! All nodes of one graph, indexed by [`NodeId`]. Edges are stored as the
//! matched pair of `observers`/`observing` sets on the two endpoints; this
//! module is the only place those sets are mutated, so the two sides can't
//! drift apart.

use std::collections::HashMap;

use super::node::{Node, NodeId, NodeKind};

/// Arena of graph nodes.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeId, Node>,
}

impl NodeArena {
    /// Create a new empty arena.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the arena.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the arena.
    ///
    /// Also removes every edge involving this node.
    pub fn remove(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        for observed in node.observing() {
            if let Some(observed) = self.nodes.get_mut(observed) {
                observed.remove_observer(node_id);
            }
        }

        for observer in node.observers() {
            if let Some(observer) = self.nodes.get_mut(observer) {
                observer.remove_observing(node_id);
            }
        }

        Some(node)
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// Add an edge: `observer` reads `observable`.
    ///
    /// Returns false if either endpoint is missing or the edge already
    /// existed.
    pub fn link(&mut self, observable: NodeId, observer: NodeId) -> bool {
        if !self.nodes.contains_key(&observable) || !self.nodes.contains_key(&observer) {
            return false;
        }
        let added = self
            .nodes
            .get_mut(&observable)
            .map_or(false, |node| node.add_observer(observer));
        if let Some(node) = self.nodes.get_mut(&observer) {
            node.add_observing(observable);
        }
        added
    }

    /// Remove the edge between `observable` and `observer`.
    pub fn unlink(&mut self, observable: NodeId, observer: NodeId) {
        if let Some(node) = self.nodes.get_mut(&observable) {
            node.remove_observer(observer);
        }
        if let Some(node) = self.nodes.get_mut(&observer) {
            node.remove_observing(observable);
        }
    }

    /// Copy of the observers of a node, in the order they subscribed.
    pub fn observers_of(&self, node_id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&node_id)
            .map(|node| node.observers().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Copy of the observables a node read during its last run.
    pub fn observing_of(&self, node_id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&node_id)
            .map(|node| node.observing().iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn observer_count(&self, node_id: NodeId) -> usize {
        self.nodes.get(&node_id).map_or(0, |node| node.observers().len())
    }

    pub fn keep_alive(&self, node_id: NodeId) -> bool {
        self.nodes.get(&node_id).map_or(false, Node::keep_alive)
    }

    /// Get the total number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
