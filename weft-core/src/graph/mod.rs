//! Dependency Graph
//!
//! This module implements the storage side of the reactive graph: the node
//! arena and the bookkeeping for one transaction.
//!
//! # Overview
//!
//! - Nodes are cells (leaf values), computations (derived values) and
//!   reactions (side effects).
//! - Edges are bidirectional: an observable lists its `observers`, an
//!   observer lists what it is `observing`. The two sets are always updated
//!   together and are the graph's only persistent structure.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena keyed by [`NodeId`] rather than pointing at
//!    each other. Observer/observable cycles are then plain index sets and
//!    tearing a node down is an explicit removal step.
//!
//! 2. The arena holds only weak references to the typed nodes. A node lives
//!    as long as client code holds a handle to it.
//!
//! 3. The propagation algorithm itself lives in the controller
//!    ([`crate::reactive::Graph`]); this module has no policy.

mod arena;
mod node;
mod transaction;

pub use arena::NodeArena;
pub use node::{Node, NodeId, NodeKind, Reactive, Snapshot};
pub use transaction::{ReactionQueue, Transaction};
