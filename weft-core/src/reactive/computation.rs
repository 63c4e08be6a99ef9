//! Computation Implementation
//!
//! A Computation is a cached derived value that re-derives only when one of
//! its inputs may have changed.
//!
//! # How Computations Work
//!
//! 1. On first access, the computation runs its derivation as an observer
//!    and caches the result. Everything the derivation reads becomes a
//!    dependency.
//!
//! 2. When an input changes inside a transaction, the graph marks the
//!    computation potentially stale. Nothing is re-derived at that point.
//!
//! 3. The next access (or the settlement check of a reaction that depends
//!    on it) re-derives and caches the new value.
//!
//! # Lifetime of the Cache
//!
//! An observed computation keeps its cache. An unobserved one only caches
//! for the duration of the outermost derivation or batch that read it;
//! after that its edges are dropped and the next read derives from scratch.
//! Keep-alive computations are never torn down for lack of observers.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cell::{default_equals, EqualsFn};
use super::runtime::Graph;
use crate::error::GraphError;
use crate::graph::{NodeId, NodeKind, Reactive, Snapshot};

/// Derivation function of a computation.
pub type DeriveFn<T> = Arc<dyn Fn() -> Result<T, GraphError> + Send + Sync>;

/// Options for [`Computation::with_options`].
pub struct ComputationOptions<T> {
    /// Predicate deciding whether a re-derived value is a change.
    pub equals: EqualsFn<T>,
    /// Keep the cache and edges while nothing observes the computation.
    pub keep_alive: bool,
}

impl<T> ComputationOptions<T> {
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.equals = Arc::new(equals);
        self
    }
}

impl<T: PartialEq + 'static> Default for ComputationOptions<T> {
    fn default() -> Self {
        Self {
            equals: Arc::new(default_equals::<T>),
            keep_alive: false,
        }
    }
}

#[derive(Debug)]
struct ComputationState<T> {
    value: Option<Arc<T>>,
    dirty: bool,
    computing: bool,
}

struct ComputationInner<T> {
    graph: Graph,
    id: NodeId,
    derive: DeriveFn<T>,
    equals: EqualsFn<T>,
    state: Mutex<ComputationState<T>>,
}

impl<T> ComputationInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_dirty(&self) -> bool {
        let dirty = self.state.lock().dirty;
        dirty || self.graph.is_potentially_stale(self.id)
    }

    fn get(&self) -> Result<T, GraphError> {
        if self.state.lock().computing {
            return Err(GraphError::Cycle { node: self.id });
        }

        self.graph.report_observed(self.id);

        if !self.is_dirty() {
            let cached = self.state.lock().value.clone();
            if let Some(value) = cached {
                return Ok((*value).clone());
            }
        }

        self.recompute()
    }

    fn recompute(&self) -> Result<T, GraphError> {
        {
            let mut state = self.state.lock();
            state.computing = true;
            state.dirty = false;
        }

        let mut guard = DeriveGuard {
            state: &self.state,
            succeeded: false,
        };
        let derive = self.derive.clone();
        let value = Arc::new(self.graph.run_observer(self.id, || derive())?);
        guard.succeeded = true;

        // The previous value is dropped outside the lock.
        let previous = {
            let mut state = self.state.lock();
            state.computing = false;
            state.value.replace(value.clone())
        };
        drop(guard);
        drop(previous);

        tracing::trace!(computation = %self.id, "derived");
        Ok((*value).clone())
    }

    /// Current value, re-derived untracked if it may be stale.
    fn current(&self) -> Result<Arc<T>, GraphError> {
        if self.is_dirty() {
            let value = self.graph.untracked(|| self.get())?;
            return Ok(Arc::new(value));
        }
        let cached = self.state.lock().value.clone();
        match cached {
            Some(value) => Ok(value),
            None => self.graph.untracked(|| self.get()).map(Arc::new),
        }
    }
}

impl<T> Reactive for ComputationInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn snapshot(&self) -> Option<Snapshot> {
        let value = self.state.lock().value.clone()?;
        Some(value as Snapshot)
    }

    fn equals_snapshot(&self, snapshot: Option<&Snapshot>) -> Result<bool, GraphError> {
        let current = self.current()?;
        let Some(previous) = snapshot.and_then(|snapshot| snapshot.downcast_ref::<T>()) else {
            return Ok(false);
        };
        Ok((self.equals)(previous, &current))
    }

    fn clear(&self) -> Option<Snapshot> {
        let mut state = self.state.lock();
        state.dirty = true;
        let value = state.value.take()?;
        Some(value as Snapshot)
    }
}

impl<T> Drop for ComputationInner<T> {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// Resets the computing flag, leaving the computation dirty unless the
/// derivation succeeded.
struct DeriveGuard<'a, T> {
    state: &'a Mutex<ComputationState<T>>,
    succeeded: bool,
}

impl<T> Drop for DeriveGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.computing = false;
        if !self.succeeded {
            state.dirty = true;
        }
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Cell, Computation, Graph};
///
/// let graph = Graph::new();
/// let first = Cell::new(&graph, String::from("Ada"));
/// let last = Cell::new(&graph, String::from("Lovelace"));
///
/// let (f, l) = (first.clone(), last.clone());
/// let full = Computation::new(&graph, move || Ok(format!("{} {}", f.get(), l.get())));
///
/// assert_eq!(full.get()?, "Ada Lovelace");
/// # Ok::<(), weft_core::GraphError>(())
/// ```
pub struct Computation<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputationInner<T>>,
}

impl<T> Computation<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a computation compared with [`default_equals`].
    ///
    /// The derivation does not run until the first read.
    pub fn new<F>(graph: &Graph, derive: F) -> Self
    where
        F: Fn() -> Result<T, GraphError> + Send + Sync + 'static,
    {
        Self::with_options(graph, derive, ComputationOptions::default())
    }
}

impl<T> Computation<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn with_options<F>(graph: &Graph, derive: F, options: ComputationOptions<T>) -> Self
    where
        F: Fn() -> Result<T, GraphError> + Send + Sync + 'static,
    {
        let inner = Arc::new(ComputationInner {
            graph: graph.clone(),
            id: NodeId::new(),
            derive: Arc::new(derive),
            equals: options.equals,
            state: Mutex::new(ComputationState {
                value: None,
                dirty: true,
                computing: false,
            }),
        });
        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn Reactive> = weak;
        graph.register(inner.id, NodeKind::Computation, handle);
        if options.keep_alive {
            graph.set_keep_alive(inner.id, true);
        }
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the value, deriving it first if it may be stale.
    ///
    /// Fails with [`GraphError::Cycle`] if called from its own derivation,
    /// and with whatever the derivation returns if it fails.
    pub fn get(&self) -> Result<T, GraphError> {
        self.inner.get()
    }

    /// Get the value without recording the read.
    pub fn get_untracked(&self) -> Result<T, GraphError> {
        self.inner.graph.untracked(|| self.inner.get())
    }

    /// Whether the next read will re-derive.
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    pub fn is_computing(&self) -> bool {
        self.inner.state.lock().computing
    }

    /// Drop the cached value and force the next read to re-derive.
    pub fn clear(&self) {
        drop(self.inner.clear());
    }

    /// Whether `value` equals the up-to-date value under this computation's
    /// predicate.
    pub fn equals(&self, value: &T) -> Result<bool, GraphError> {
        let current = self.inner.current()?;
        Ok((self.inner.equals)(value, &current))
    }

    pub fn is_keep_alive(&self) -> bool {
        self.inner.graph.is_keep_alive(self.inner.id)
    }

    /// Change the keep-alive flag. Turning it off while unobserved tears
    /// the computation down.
    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.inner.graph.set_keep_alive(self.inner.id, keep_alive);
    }
}

impl<T> Clone for Computation<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Computation<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn computation_derives_lazily() {
        let graph = Graph::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let computation = Computation::new(&graph, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(computation.is_dirty());
        assert_eq!(computation.get().unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keep_alive_caches_between_reads() {
        let graph = Graph::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let computation = Computation::with_options(
            &graph,
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            },
            ComputationOptions::default().keep_alive(true),
        );

        computation.get().unwrap();
        computation.get().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(computation.is_keep_alive());
    }

    #[test]
    fn unobserved_computation_rederives_each_read() {
        let graph = Graph::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let computation = Computation::new(&graph, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        computation.get().unwrap();
        computation.get().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_derivation_stays_dirty() {
        let graph = Graph::new();
        let fail = Cell::new(&graph, true);
        let fail_clone = fail.clone();

        let computation = Computation::with_options(
            &graph,
            move || {
                if fail_clone.get() {
                    Err(GraphError::derivation("not ready"))
                } else {
                    Ok(7)
                }
            },
            ComputationOptions::default().keep_alive(true),
        );

        assert_eq!(computation.get(), Err(GraphError::derivation("not ready")));
        assert!(computation.is_dirty());
        assert!(!computation.is_computing());
        assert_eq!(graph.stack_depth(), 0);

        fail.set(false).unwrap();
        assert_eq!(computation.get().unwrap(), 7);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let graph = Graph::new();
        let slot: Arc<Mutex<Option<Computation<i32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();

        let computation = Computation::new(&graph, move || {
            let this = slot_clone.lock().clone();
            match this {
                Some(this) => this.get(),
                None => Ok(0),
            }
        });
        *slot.lock() = Some(computation.clone());

        assert_eq!(
            computation.get(),
            Err(GraphError::Cycle {
                node: computation.id()
            })
        );
        assert!(!computation.is_computing());

        // Break the reference cycle through the slot.
        slot.lock().take();
    }

    #[test]
    fn clear_forces_rederive() {
        let graph = Graph::new();
        let computation = Computation::with_options(
            &graph,
            || Ok(3),
            ComputationOptions::default().keep_alive(true),
        );

        computation.get().unwrap();
        assert!(!computation.is_dirty());

        computation.clear();
        assert!(computation.is_dirty());
        assert!(computation.equals(&3).unwrap());
    }
}
