//! Cell Implementation
//!
//! A Cell is the leaf reactive primitive. It holds a value and reports
//! reads and writes to its graph.
//!
//! # How Cells Work
//!
//! 1. `get` records the read against the running observer, if any.
//!
//! 2. `set` compares the new value with the current one. Equal values are
//!    dropped without touching the graph.
//!
//! 3. A genuine change to an observed cell is reported to the graph along
//!    with the previous value, which settlement uses to detect writes that
//!    were undone within the same transaction. Writes to unobserved cells
//!    are plain stores.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::runtime::Graph;
use crate::error::GraphError;
use crate::graph::{NodeId, NodeKind, Reactive, Snapshot};

/// Equality predicate used to detect no-op writes.
pub type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// `==`, except that two values that are each unequal to themselves (such
/// as NaN) are equal.
#[allow(clippy::eq_op)]
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b || (a != a && b != b)
}

struct CellInner<T> {
    graph: Graph,
    id: NodeId,
    value: RwLock<T>,
    equals: EqualsFn<T>,
}

impl<T> Reactive for CellInner<T>
where
    T: Send + Sync + 'static,
{
    fn equals_snapshot(&self, snapshot: Option<&Snapshot>) -> Result<bool, GraphError> {
        let Some(previous) = snapshot.and_then(|snapshot| snapshot.downcast_ref::<T>()) else {
            return Ok(false);
        };
        let current = self.value.read();
        Ok((self.equals)(previous, &current))
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// A reactive value holder.
///
/// Cloning a `Cell` yields another handle to the same node.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Cell, Graph};
///
/// let graph = Graph::new();
/// let count = Cell::new(&graph, 0);
///
/// count.set(5)?;
/// assert_eq!(count.get(), 5);
/// # Ok::<(), weft_core::GraphError>(())
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new cell compared with [`default_equals`].
    pub fn new(graph: &Graph, value: T) -> Self {
        Self::with_equals(graph, value, default_equals::<T>)
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with a custom equality predicate.
    pub fn with_equals<F>(graph: &Graph, value: T, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let inner = Arc::new(CellInner {
            graph: graph.clone(),
            id: NodeId::new(),
            value: RwLock::new(value),
            equals: Arc::new(equals),
        });
        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn Reactive> = weak;
        graph.register(inner.id, NodeKind::Cell, handle);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recording the read.
    pub fn get(&self) -> T {
        self.inner.graph.report_observed(self.inner.id);
        self.inner.value.read().clone()
    }

    /// Get the current value without recording the read.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Store a new value.
    ///
    /// Fails without storing anything if the graph rejects the write.
    pub fn set(&self, value: T) -> Result<(), GraphError> {
        let inner = &self.inner;
        if (inner.equals)(&inner.value.read(), &value) {
            return Ok(());
        }

        if !inner.graph.is_observed(inner.id) {
            *inner.value.write() = value;
            return Ok(());
        }

        inner.graph.check_write(inner.id)?;
        let previous: Snapshot = Arc::new(std::mem::replace(&mut *inner.value.write(), value));
        inner.graph.report_changed(inner.id, Some(previous))
    }

    /// Replace the value with `f` applied to the current one.
    pub fn update<F>(&self, f: F) -> Result<(), GraphError>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        let next = f(&current);
        self.set(next)
    }

    /// Whether `value` equals the current value under this cell's predicate.
    pub fn equals(&self, value: &T) -> bool {
        (self.inner.equals)(value, &self.inner.value.read())
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}
