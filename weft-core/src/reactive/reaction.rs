//! Reaction Implementation
//!
//! A Reaction is the terminal observer: it has dependencies but nothing
//! depends on it, and it exists for its side effect.
//!
//! # How Reactions Work
//!
//! 1. [`Reaction::track`] runs a closure as the reaction's observer. Every
//!    cell or computation read inside becomes a dependency, replacing the
//!    dependencies of the previous run.
//!
//! 2. When a dependency changes, the reaction is queued. At settlement the
//!    graph calls the reaction's callback if a dependency genuinely
//!    changed. The callback normally re-tracks.
//!
//! 3. [`Reaction::start`] and [`Reaction::end`] expose the same boundaries
//!    manually, for tracking that spans suspension points.
//!
//! # Disposal
//!
//! Disposing is permanent. A reaction disposed while it is tracking keeps
//! its place on the observer stack, so enclosing observers are unaffected
//! and its own `end` still succeeds. Dropping the last handle disposes the
//! reaction as well.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::runtime::Graph;
use crate::error::GraphError;
use crate::graph::{NodeId, NodeKind, Reactive};

/// Callback run when a reaction's dependencies changed.
pub type ReactionFn = Arc<dyn Fn(&Reaction) -> Result<(), GraphError> + Send + Sync>;

struct ReactionInner {
    graph: Graph,
    id: NodeId,
    callback: ReactionFn,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    this: Weak<ReactionInner>,
}

impl Reactive for ReactionInner {
    fn react(&self) -> Result<(), GraphError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(inner) = self.this.upgrade() else {
            return Ok(());
        };

        self.run_count.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(reaction = %self.id, "reacting");
        (self.callback)(&Reaction { inner })
    }
}

impl Drop for ReactionInner {
    fn drop(&mut self) {
        self.graph.unregister(self.id);
    }
}

/// A side-effecting observer.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{Cell, Graph, Reaction};
///
/// let graph = Graph::new();
/// let name = Cell::new(&graph, "Ada");
///
/// let source = name.clone();
/// let reaction = Reaction::new(&graph, move |reaction| {
///     reaction.track(|| {
///         println!("hello {}", source.get());
///         Ok(())
///     })
/// });
/// reaction.track(|| {
///     name.get();
///     Ok(())
/// })?;
///
/// name.set("Grace")?;
/// assert_eq!(reaction.run_count(), 1);
/// # Ok::<(), weft_core::GraphError>(())
/// ```
#[must_use = "dropping the last handle to a Reaction disposes it"]
#[derive(Clone)]
pub struct Reaction {
    inner: Arc<ReactionInner>,
}

impl Reaction {
    /// Create a reaction. Nothing is tracked until [`Reaction::track`] or
    /// [`Reaction::start`] is called.
    pub fn new<F>(graph: &Graph, callback: F) -> Self
    where
        F: Fn(&Reaction) -> Result<(), GraphError> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|this| ReactionInner {
            graph: graph.clone(),
            id: NodeId::new(),
            callback: Arc::new(callback),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            this: this.clone(),
        });
        let weak = Arc::downgrade(&inner);
        let handle: Weak<dyn Reactive> = weak;
        graph.register(inner.id, NodeKind::Reaction, handle);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Run `f` as this reaction's observer and return its result.
    ///
    /// A disposed reaction runs `f` untracked.
    pub fn track<R>(&self, f: impl FnOnce() -> Result<R, GraphError>) -> Result<R, GraphError> {
        if self.is_disposed() {
            return self.inner.graph.untracked(f);
        }
        self.inner.graph.run_observer(self.inner.id, f)
    }

    /// Run the callback now, as settlement would.
    pub fn react(&self) -> Result<(), GraphError> {
        self.inner.react()
    }

    /// Stop reacting and drop all dependencies.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(reaction = %self.inner.id, "disposing reaction");
        self.inner.graph.remove(self.inner.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Begin tracking manually. Must be paired with [`Reaction::end`].
    ///
    /// A disposed reaction tracks nothing; reads until `end` are untracked.
    pub fn start(&self) {
        if self.is_disposed() {
            self.inner.graph.push_untracked();
            return;
        }
        self.inner.graph.start_observer(self.inner.id);
    }

    /// End manual tracking.
    ///
    /// Fails if nothing is being tracked, or if another observer started
    /// after this one and has not ended yet.
    pub fn end(&self) -> Result<(), GraphError> {
        self.inner.graph.end_observer(self.inner.id)
    }

    /// Number of times the callback has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of nodes read during the last tracked run.
    pub fn dependency_count(&self) -> usize {
        self.inner.graph.dependency_count(self.inner.id)
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
