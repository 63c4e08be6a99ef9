//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, computations,
//! and reactions. It owns the dependency graph and every piece of
//! transaction-scoped state, and implements the propagation algorithm.
//!
//! # How It Works
//!
//! 1. Reading an observable while an observer runs links the two
//!    (`report_observed`).
//!
//! 2. Writing an observable (`report_changed`) records its previous value
//!    once per transaction, marks every computation reachable from it as
//!    potentially stale, and queues every reachable reaction.
//!
//! 3. When the outermost batch ends, each queued reaction is checked: it
//!    runs only if one of its dependencies produced a genuinely different
//!    value. Computations re-derive lazily during that check, so a
//!    derivation whose inputs toggled back to the same output notifies
//!    nobody.
//!
//! # Locking
//!
//! All state sits behind one mutex. It is never held while user code runs:
//! derivations, reactions, equality predicates and subscriber callbacks are
//! all invoked after the lock is released. Notifications and values that
//! must be dropped are collected in an [`Outbox`] while locked and handled
//! afterwards. The graph is meant to be driven from one thread at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::{ObserverStack, ReactiveContext};
use super::subscriber::{
    CompleteCallback, ObservedCallback, Subscription, SubscriptionId, SubscriptionTarget,
};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::graph::{Node, NodeArena, NodeId, NodeKind, Reactive, Snapshot, Transaction};

/// Work collected while the state lock is held.
#[derive(Default)]
pub(crate) struct Outbox {
    notifications: Vec<(NodeId, bool)>,
    released: Vec<Snapshot>,
}

impl Outbox {
    fn notify(&mut self, node_id: NodeId, observed: bool) {
        self.notifications.push((node_id, observed));
    }

    fn release(&mut self, value: Option<Snapshot>) {
        self.released.extend(value);
    }
}

/// How a write should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteDecision {
    Propagate,
    /// The writer is the sole observer of the node it writes.
    Ignore,
    /// No action is open; wrap the write in its own action.
    AutoAction,
}

pub(crate) struct GraphState {
    arena: NodeArena,
    stack: ObserverStack,
    txn: Transaction,
    enforce_actions: bool,
    observed_callbacks: HashMap<NodeId, IndexMap<SubscriptionId, ObservedCallback>>,
    complete_callbacks: IndexMap<SubscriptionId, CompleteCallback>,
    /// One frame per synchronous batch/action, holding the orphan flag of
    /// every task called inside it.
    task_frames: SmallVec<[Vec<Arc<AtomicBool>>; 4]>,
    /// A task settled with an error and did not reopen its transaction.
    task_rejected: bool,
}

impl GraphState {
    fn new(config: GraphConfig) -> Self {
        Self {
            arena: NodeArena::new(),
            stack: ObserverStack::default(),
            txn: Transaction::new(),
            enforce_actions: config.enforce_actions,
            observed_callbacks: HashMap::new(),
            complete_callbacks: IndexMap::new(),
            task_frames: SmallVec::new(),
            task_rejected: false,
        }
    }

    fn is_observed(&self, node_id: NodeId) -> bool {
        self.arena.observer_count(node_id) > 0
            || self.txn.potential_unobserved.contains(&node_id)
    }

    fn handle(&self, node_id: NodeId) -> Option<Arc<dyn Reactive>> {
        self.arena.get(node_id).and_then(Node::handle)
    }

    fn report_observed(&mut self, node_id: NodeId, out: &mut Outbox) {
        let Some(top) = self.stack.top() else {
            return;
        };
        let already_linked = self
            .arena
            .get(top)
            .map_or(true, |observer| observer.observing().contains(&node_id));
        if already_linked || !self.arena.contains(node_id) {
            return;
        }

        self.txn.propagated.remove(&node_id);
        if !self.is_observed(node_id) {
            out.notify(node_id, true);
        }
        self.arena.link(node_id, top);
        tracing::trace!(observable = %node_id, observer = %top, "edge added");
    }

    fn write_decision(&self, node_id: NodeId) -> Result<WriteDecision, GraphError> {
        if !self.arena.contains(node_id) {
            return Err(GraphError::UnknownNode(node_id));
        }

        if !self.stack.is_empty() && self.is_observed(node_id) {
            let deriving = self
                .stack
                .running()
                .any(|running| self.arena.kind(running) == Some(NodeKind::Computation));
            if deriving {
                return Err(GraphError::WriteDuringRead { node: node_id });
            }

            if let Some(top) = self.stack.top() {
                let observers = self
                    .arena
                    .get(node_id)
                    .map(Node::observers)
                    .filter(|observers| observers.contains(&top));
                // Writing a node the running reaction created and is the only
                // one to observe is allowed and doesn't propagate.
                if observers.map_or(false, |observers| observers.len() == 1) {
                    return Ok(WriteDecision::Ignore);
                }
                return Err(GraphError::WriteDuringRead { node: node_id });
            }
        }

        if !self.txn.in_action {
            if self.enforce_actions {
                return Err(GraphError::ActionRequired { node: node_id });
            }
            return Ok(WriteDecision::AutoAction);
        }

        Ok(WriteDecision::Propagate)
    }

    fn record_change(&mut self, node_id: NodeId, old_value: Option<Snapshot>, out: &mut Outbox) {
        if self.txn.propagated.contains(&node_id) {
            out.release(old_value);
            return;
        }

        if self.txn.changed.contains_key(&node_id) {
            out.release(old_value);
        } else {
            self.txn.changed.insert(node_id, old_value);
        }

        self.txn.propagated.insert(node_id);
        self.propagate_change(node_id);
    }

    /// Mark every computation below `node_id` potentially stale and queue
    /// every reaction below it.
    fn propagate_change(&mut self, node_id: NodeId) {
        for child in self.arena.observers_of(node_id) {
            match self.arena.kind(child) {
                Some(NodeKind::Computation) => {
                    // First change this transaction: keep the value the
                    // computation held for the comparison at settlement.
                    if !self.txn.changed.contains_key(&child) {
                        let snapshot = self.handle(child).and_then(|node| node.snapshot());
                        self.txn.changed.insert(child, snapshot);
                    }

                    if self.txn.potentially_stale.insert(child) {
                        tracing::trace!(computation = %child, "marked potentially stale");
                        self.propagate_change(child);
                    }
                }
                Some(NodeKind::Reaction) => self.txn.queued.requeue(child),
                Some(NodeKind::Cell) | None => {}
            }
        }
    }

    fn start_observer(&mut self, node_id: NodeId) {
        for observed in self.arena.observing_of(node_id) {
            self.arena.unlink(observed, node_id);
            if self.arena.observer_count(observed) == 0 {
                self.txn.potential_unobserved.insert(observed);
            }
        }
        self.stack.push(Some(node_id));
    }

    fn end_observer(&mut self, node_id: NodeId, out: &mut Outbox) -> Result<(), GraphError> {
        match self.stack.top_slot() {
            None => return Err(GraphError::NoObserverStarted),
            Some(Some(active)) if active != node_id => {
                return Err(GraphError::ObserverMismatch {
                    node: node_id,
                    active,
                });
            }
            Some(_) => {}
        }

        // Computations read by an observer stay cached until the outermost
        // observer or batch ends.
        if self.arena.kind(node_id) == Some(NodeKind::Computation) {
            self.txn.invoked.insert(node_id);
        }

        self.stack.pop();
        if self.stack.is_empty() {
            self.stack_emptied(out);
        }
        Ok(())
    }

    fn pop_untracked(&mut self, out: &mut Outbox) {
        self.stack.pop();
        if self.stack.is_empty() {
            self.stack_emptied(out);
        }
    }

    fn stack_emptied(&mut self, out: &mut Outbox) {
        if !self.txn.in_batch {
            self.clear_invoked(out);
        }

        let candidates: Vec<NodeId> = self.txn.potential_unobserved.iter().copied().collect();
        for observable in candidates {
            if self.arena.observer_count(observable) == 0 {
                if self.arena.kind(observable) == Some(NodeKind::Computation) {
                    self.remove(observable, false, out);
                } else {
                    out.notify(observable, false);
                }
            }
        }
        self.txn.potential_unobserved.clear();
    }

    /// Tear down unobserved computations cached for the scope that just
    /// ended.
    fn clear_invoked(&mut self, out: &mut Outbox) {
        let invoked = std::mem::take(&mut self.txn.invoked);
        for computation in invoked {
            if self.arena.observer_count(computation) == 0 && !self.arena.keep_alive(computation) {
                self.remove(computation, false, out);
            }
        }
    }

    /// Detach an observer from everything it reads.
    ///
    /// Used when a reaction is disposed, when a computation loses its last
    /// observer, and when an unobserved computation's cache expires.
    fn remove(&mut self, node_id: NodeId, force_unobserved: bool, out: &mut Outbox) {
        let Some(kind) = self.arena.kind(node_id) else {
            return;
        };
        let is_computation = kind == NodeKind::Computation;
        let was_observed = force_unobserved || (is_computation && self.is_observed(node_id));

        for observed in self.arena.observing_of(node_id) {
            self.arena.unlink(observed, node_id);
            if !self.is_observed(observed) {
                let cascade = self.arena.kind(observed) == Some(NodeKind::Computation)
                    && !self.arena.keep_alive(observed);
                if cascade {
                    self.remove(observed, true, out);
                } else {
                    out.notify(observed, false);
                }
            }
        }

        // A reaction disposed while it runs keeps its stack position.
        self.stack.detach(node_id);

        if is_computation {
            tracing::debug!(computation = %node_id, "tearing down computation");
            if let Some(node) = self.handle(node_id) {
                out.release(node.clear());
            }
            if was_observed {
                out.notify(node_id, false);
            }
        }
    }

    /// Begin settling the outermost batch, or just unwind one level.
    fn begin_end_batch(&mut self) -> Result<bool, GraphError> {
        match self.txn.batch_depth {
            0 => Err(GraphError::NoTransaction),
            1 => Ok(true),
            _ => {
                self.txn.batch_depth -= 1;
                Ok(false)
            }
        }
    }

    fn end_action_depth(&mut self) -> Result<(), GraphError> {
        if self.txn.action_depth == 0 {
            return Err(GraphError::NoTransaction);
        }
        self.txn.action_depth -= 1;
        if self.txn.action_depth == 0 {
            self.txn.in_action = false;
        }
        Ok(())
    }

    /// Reset all transaction-scoped state after the outermost batch.
    fn finish_transaction(&mut self, out: &mut Outbox) {
        self.txn.in_batch = false;
        self.txn.in_action = false;
        self.txn.action_depth = 0;
        self.txn.queued.clear();
        for (_, snapshot) in self.txn.changed.drain() {
            out.release(snapshot);
        }
        self.txn.propagated.clear();

        // Anything still potentially stale was never re-derived.
        let stale = std::mem::take(&mut self.txn.potentially_stale);
        for computation in stale {
            if let Some(node) = self.handle(computation) {
                out.release(node.clear());
            }
        }

        self.clear_invoked(out);
        self.txn.batch_depth = self.txn.batch_depth.saturating_sub(1);
    }

    fn unregister(&mut self, node_id: NodeId, out: &mut Outbox) {
        if self.arena.kind(node_id).map_or(false, NodeKind::is_observer) {
            self.remove(node_id, false, out);
        }
        for observer in self.arena.observers_of(node_id) {
            self.arena.unlink(node_id, observer);
        }
        self.arena.remove(node_id);
        self.observed_callbacks.remove(&node_id);
        out.release(self.txn.forget(node_id));
    }
}

/// A reactive graph.
///
/// `Graph` is a cheap handle; clones share the same graph. Every cell,
/// computation and reaction belongs to exactly one graph, and independent
/// graphs never interact.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{effect, Cell, Computation, Graph};
///
/// let graph = Graph::new();
/// let count = Cell::new(&graph, 1);
///
/// let source = count.clone();
/// let doubled = Computation::new(&graph, move || Ok(source.get() * 2));
///
/// let watched = doubled.clone();
/// let reaction = effect(&graph, move |_| {
///     watched.get()?;
///     Ok(())
/// })?;
///
/// count.set(5)?;
/// assert_eq!(doubled.get()?, 10);
/// assert_eq!(reaction.run_count(), 1);
/// # Ok::<(), weft_core::GraphError>(())
/// ```
#[derive(Clone)]
pub struct Graph {
    state: Arc<Mutex<GraphState>>,
}

impl Graph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(GraphState::new(config))),
        }
    }

    /// Run `f` against the locked state, then deliver whatever it queued.
    fn with_state<R>(&self, f: impl FnOnce(&mut GraphState, &mut Outbox) -> R) -> R {
        let mut out = Outbox::default();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut out)
        };
        self.flush(out);
        result
    }

    fn flush(&self, out: Outbox) {
        let Outbox {
            notifications,
            released,
        } = out;
        drop(released);

        for (node_id, observed) in notifications {
            let callbacks: Vec<ObservedCallback> = {
                let state = self.state.lock();
                state
                    .observed_callbacks
                    .get(&node_id)
                    .map(|callbacks| callbacks.values().cloned().collect())
                    .unwrap_or_default()
            };
            tracing::trace!(node = %node_id, observed, "observed state changed");
            for callback in callbacks {
                callback(observed);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub(crate) fn register(&self, node_id: NodeId, kind: NodeKind, handle: Weak<dyn Reactive>) {
        self.with_state(|state, _| {
            state.arena.insert(Node::new(node_id, kind, handle));
        });
        tracing::trace!(node = %node_id, ?kind, "node registered");
    }

    pub(crate) fn unregister(&self, node_id: NodeId) {
        self.with_state(|state, out| state.unregister(node_id, out));
        tracing::trace!(node = %node_id, "node unregistered");
    }

    // ------------------------------------------------------------------------
    // Read / write protocol
    // ------------------------------------------------------------------------

    /// Record a read of `node_id` by the running observer, if any.
    pub fn report_observed(&self, node_id: NodeId) {
        self.with_state(|state, out| state.report_observed(node_id, out));
    }

    /// Fail if writing `node_id` right now would be rejected.
    ///
    /// Lets a node refuse a write before applying it.
    pub(crate) fn check_write(&self, node_id: NodeId) -> Result<(), GraphError> {
        self.with_state(|state, _| state.write_decision(node_id)).map(|_| ())
    }

    /// Report that `node_id` changed, propagating to everything below it.
    ///
    /// `old_value` is the value held before the change; it is kept (first
    /// write per transaction only) to decide at settlement whether the node
    /// really changed. Outside an action the write is wrapped in one, unless
    /// strict actions are enforced.
    pub fn report_changed(&self, node_id: NodeId, old_value: Option<Snapshot>) -> Result<(), GraphError> {
        let mut old_value = old_value;
        let decision = self.with_state(|state, out| {
            let decision = state.write_decision(node_id)?;
            if decision == WriteDecision::Propagate {
                state.record_change(node_id, old_value.take(), out);
            }
            Ok::<_, GraphError>(decision)
        })?;

        match decision {
            WriteDecision::AutoAction => {
                self.start_action();
                let reported = self.report_changed(node_id, old_value);
                let ended = self.end_action();
                reported.and(ended)
            }
            WriteDecision::Propagate | WriteDecision::Ignore => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Observer stack
    // ------------------------------------------------------------------------

    pub(crate) fn start_observer(&self, node_id: NodeId) {
        self.with_state(|state, _| state.start_observer(node_id));
    }

    pub(crate) fn end_observer(&self, node_id: NodeId) -> Result<(), GraphError> {
        self.with_state(|state, out| state.end_observer(node_id, out))
    }

    pub(crate) fn push_untracked(&self) {
        self.with_state(|state, _| state.stack.push(None));
    }

    pub(crate) fn pop_untracked(&self) {
        self.with_state(|state, out| state.pop_untracked(out));
    }

    /// Run `f` as observer `node_id`, rebuilding its dependencies.
    pub(crate) fn run_observer<R>(
        &self,
        node_id: NodeId,
        f: impl FnOnce() -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        let context = ReactiveContext::enter(self, node_id);
        let result = f();
        if result.is_ok() {
            self.with_state(|state, _| state.txn.potentially_stale.remove(&node_id));
        }
        let exited = context.exit();
        let value = result?;
        exited?;
        Ok(value)
    }

    /// Run `f` without tracking any reads it makes.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let context = ReactiveContext::untracked(self);
        let value = f();
        // Untracked exits can't fail.
        let _ = context.exit();
        value
    }

    /// Detach an observer from everything it reads.
    pub(crate) fn remove(&self, node_id: NodeId) {
        self.with_state(|state, out| state.remove(node_id, false, out));
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Whether an observer is running and reads are being tracked.
    pub fn is_tracking(&self) -> bool {
        self.state.lock().stack.top().is_some()
    }

    pub fn is_in_action(&self) -> bool {
        self.state.lock().txn.in_action
    }

    pub fn is_in_batch(&self) -> bool {
        self.state.lock().txn.in_batch
    }

    /// Whether any observer depends on `node_id`.
    pub fn is_observed(&self, node_id: NodeId) -> bool {
        self.state.lock().is_observed(node_id)
    }

    /// Whether `node_id` was reached by a change this transaction and has
    /// not been re-derived yet.
    pub fn is_potentially_stale(&self, node_id: NodeId) -> bool {
        self.state.lock().txn.potentially_stale.contains(&node_id)
    }

    pub fn observer_count(&self, node_id: NodeId) -> usize {
        self.state.lock().arena.observer_count(node_id)
    }

    pub fn dependency_count(&self, node_id: NodeId) -> usize {
        self.state
            .lock()
            .arena
            .get(node_id)
            .map_or(0, |node| node.observing().len())
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().arena.len()
    }

    pub(crate) fn stack_depth(&self) -> usize {
        self.state.lock().stack.len()
    }

    pub(crate) fn is_keep_alive(&self, node_id: NodeId) -> bool {
        self.state.lock().arena.keep_alive(node_id)
    }

    /// Set a node's keep-alive flag.
    ///
    /// Turning it off while the node is unobserved tears the node down.
    pub(crate) fn set_keep_alive(&self, node_id: NodeId, keep_alive: bool) {
        self.with_state(|state, out| {
            let Some(node) = state.arena.get_mut(node_id) else {
                return;
            };
            let was_keep_alive = node.keep_alive();
            node.set_keep_alive(keep_alive);
            if was_keep_alive && !keep_alive && !state.is_observed(node_id) {
                state.remove(node_id, false, out);
            }
        });
    }

    // ------------------------------------------------------------------------
    // Configuration & subscriptions
    // ------------------------------------------------------------------------

    /// Toggle whether writes outside an action fail instead of being
    /// wrapped in their own action.
    pub fn enforce_actions(&self, enforce: bool) {
        self.state.lock().enforce_actions = enforce;
    }

    pub fn is_enforcing_actions(&self) -> bool {
        self.state.lock().enforce_actions
    }

    /// Subscribe to `node_id` becoming observed (`true`) or unobserved
    /// (`false`).
    pub fn on_observed_state_change<F>(&self, node_id: NodeId, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.state
            .lock()
            .observed_callbacks
            .entry(node_id)
            .or_default()
            .insert(id, Arc::new(callback));
        Subscription::new(self.clone(), id, SubscriptionTarget::ObservedState(node_id))
    }

    /// Subscribe to the end of every settlement that ran a reaction.
    pub fn on_reactions_complete<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.state
            .lock()
            .complete_callbacks
            .insert(id, Arc::new(callback));
        Subscription::new(self.clone(), id, SubscriptionTarget::ReactionsComplete)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId, target: SubscriptionTarget) {
        // Removed callbacks are dropped after the lock is released.
        let removed = {
            let mut state = self.state.lock();
            match target {
                SubscriptionTarget::ObservedState(node_id) => {
                    let removed = state
                        .observed_callbacks
                        .get_mut(&node_id)
                        .and_then(|callbacks| callbacks.shift_remove(&id))
                        .map(|callback| Box::new(callback) as Box<dyn Send>);
                    if state
                        .observed_callbacks
                        .get(&node_id)
                        .map_or(false, IndexMap::is_empty)
                    {
                        state.observed_callbacks.remove(&node_id);
                    }
                    removed
                }
                SubscriptionTarget::ReactionsComplete => state
                    .complete_callbacks
                    .shift_remove(&id)
                    .map(|callback| Box::new(callback) as Box<dyn Send>),
            }
        };
        drop(removed);
    }

    #[cfg(test)]
    pub(crate) fn reactions_complete_subscribers(&self) -> usize {
        self.state.lock().complete_callbacks.len()
    }

    // ------------------------------------------------------------------------
    // Crate-internal access for the batch and task protocols
    // ------------------------------------------------------------------------

    pub(crate) fn start_transaction(&self, as_action: bool) {
        let mut state = self.state.lock();
        if as_action {
            state.txn.start_action();
        } else {
            state.txn.start_batch();
        }
    }

    pub(crate) fn end_action_depth(&self) -> Result<(), GraphError> {
        self.state.lock().end_action_depth()
    }

    pub(crate) fn begin_end_batch(&self) -> Result<bool, GraphError> {
        self.state.lock().begin_end_batch()
    }

    pub(crate) fn next_queued(&self) -> Option<NodeId> {
        self.state.lock().txn.queued.next()
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.state.lock().txn.queued.len()
    }

    /// Close the outermost transaction, returning the callbacks to fire if
    /// reactions ran.
    pub(crate) fn finish_transaction(&self, reactions_ran: bool) -> Vec<CompleteCallback> {
        self.with_state(|state, out| {
            state.finish_transaction(out);
            if reactions_ran {
                state.complete_callbacks.values().cloned().collect()
            } else {
                Vec::new()
            }
        })
    }

    /// Unwind one synchronous scope whose body panicked. Reactions are not
    /// run; the outermost scope discards the transaction.
    pub(crate) fn abandon_transaction(&self, as_action: bool) {
        self.with_state(|state, out| {
            state.task_frames.pop();
            if as_action {
                let _ = state.end_action_depth();
            }
            match state.txn.batch_depth {
                0 => {}
                1 => state.finish_transaction(out),
                _ => state.txn.batch_depth -= 1,
            }
        });
        tracing::warn!(as_action, "transaction abandoned after a panic");
    }

    pub(crate) fn node_handle(&self, node_id: NodeId) -> Option<Arc<dyn Reactive>> {
        self.state.lock().handle(node_id)
    }

    /// What the settlement check needs to know about one node.
    pub(crate) fn settlement_view(&self, node_id: NodeId) -> Option<SettlementView> {
        let state = self.state.lock();
        let node = state.arena.get(node_id)?;
        Some(SettlementView {
            kind: node.kind(),
            observing: node.observing().iter().copied().collect(),
            snapshot: state.txn.changed.get(&node_id).cloned().flatten(),
        })
    }

    pub(crate) fn is_changed(&self, node_id: NodeId) -> bool {
        self.state.lock().txn.changed.contains_key(&node_id)
    }

    /// The node turned out not to have changed this transaction.
    pub(crate) fn confirm_unchanged(&self, node_id: NodeId) {
        self.with_state(|state, out| {
            out.release(state.txn.changed.remove(&node_id).flatten());
            state.txn.potentially_stale.remove(&node_id);
        });
    }

    /// Register a task with the innermost synchronous scope.
    ///
    /// Returns whether an action (rather than a plain batch) is open along
    /// with the task's orphan flag, or `None` when no transaction is open.
    pub(crate) fn begin_task(&self) -> Option<(bool, Arc<AtomicBool>)> {
        let mut state = self.state.lock();
        if !state.txn.in_batch {
            return None;
        }
        let orphaned = Arc::new(AtomicBool::new(false));
        if let Some(frame) = state.task_frames.last_mut() {
            frame.push(orphaned.clone());
        }
        Some((state.txn.in_action, orphaned))
    }

    /// Reopen the transaction a task closed, unless the task was orphaned
    /// or settled with an error.
    pub(crate) fn resume_after_task(&self, as_action: bool, orphaned: &AtomicBool, rejected: bool) -> bool {
        if orphaned.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock();
        if rejected {
            state.task_rejected = true;
            return false;
        }
        if as_action {
            state.txn.start_action();
        } else {
            state.txn.start_batch();
        }
        true
    }

    pub(crate) fn take_task_rejected(&self) -> bool {
        std::mem::take(&mut self.state.lock().task_rejected)
    }

    pub(crate) fn push_task_frame(&self) {
        self.state.lock().task_frames.push(Vec::new());
    }

    /// Pop the innermost synchronous scope's frame. Tasks called in it are
    /// orphaned, and `true` is returned if there were any.
    pub(crate) fn pop_task_frame(&self) -> bool {
        let tasks = self.state.lock().task_frames.pop().unwrap_or_default();
        for orphaned in &tasks {
            orphaned.store(true, Ordering::SeqCst);
        }
        !tasks.is_empty()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Graph")
            .field("nodes", &state.arena.len())
            .field("stack_depth", &state.stack.len())
            .field("batch_depth", &state.txn.batch_depth)
            .field("in_action", &state.txn.in_action)
            .field("queued", &state.txn.queued.len())
            .finish()
    }
}

/// Snapshot of one node taken for the settlement check.
pub(crate) struct SettlementView {
    pub kind: NodeKind,
    pub observing: Vec<NodeId>,
    pub snapshot: Option<Snapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    struct MockNode {
        cleared: AtomicBool,
        reacted: AtomicI32,
    }

    impl MockNode {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                cleared: AtomicBool::new(false),
                reacted: AtomicI32::new(0),
            })
        }
    }

    impl Reactive for MockNode {
        fn clear(&self) -> Option<Snapshot> {
            self.cleared.store(true, Ordering::SeqCst);
            None
        }

        fn react(&self) -> Result<(), GraphError> {
            self.reacted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn register(graph: &Graph, kind: NodeKind, node: &Arc<MockNode>) -> NodeId {
        let id = NodeId::new();
        let handle: Weak<dyn Reactive> = Arc::downgrade(node) as Weak<MockNode>;
        graph.register(id, kind, handle);
        id
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let graph = Graph::new();
        let node = MockNode::new();
        let id = register(&graph, NodeKind::Cell, &node);

        assert_eq!(graph.node_count(), 1);
        graph.unregister(id);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn reads_link_the_running_observer() {
        let graph = Graph::new();
        let cell = MockNode::new();
        let reaction = MockNode::new();
        let cell_id = register(&graph, NodeKind::Cell, &cell);
        let reaction_id = register(&graph, NodeKind::Reaction, &reaction);

        // Untracked reads are ignored.
        graph.report_observed(cell_id);
        assert!(!graph.is_observed(cell_id));

        graph.start_observer(reaction_id);
        graph.report_observed(cell_id);
        graph.end_observer(reaction_id).unwrap();

        assert!(graph.is_observed(cell_id));
        assert_eq!(graph.dependency_count(reaction_id), 1);
    }

    #[test]
    fn change_queues_reaction_and_marks_computation_stale() {
        let graph = Graph::new();
        let cell = MockNode::new();
        let computation = MockNode::new();
        let reaction = MockNode::new();
        let cell_id = register(&graph, NodeKind::Cell, &cell);
        let computation_id = register(&graph, NodeKind::Computation, &computation);
        let reaction_id = register(&graph, NodeKind::Reaction, &reaction);

        graph.start_observer(reaction_id);
        graph.start_observer(computation_id);
        graph.report_observed(cell_id);
        graph.end_observer(computation_id).unwrap();
        graph.report_observed(computation_id);
        graph.end_observer(reaction_id).unwrap();

        graph.start_action();
        graph.report_changed(cell_id, None).unwrap();
        assert!(graph.is_potentially_stale(computation_id));
        assert_eq!(graph.queued_len(), 1);
        graph.end_action().unwrap();

        // The mock never equals its snapshot, so the change is genuine.
        assert_eq!(reaction.reacted.load(Ordering::SeqCst), 1);
        assert!(!graph.is_potentially_stale(computation_id));
    }

    #[test]
    fn unknown_node_write_is_rejected() {
        let graph = Graph::new();
        let missing = NodeId::new();
        assert_eq!(
            graph.report_changed(missing, None),
            Err(GraphError::UnknownNode(missing))
        );
    }

    #[test]
    fn mismatched_end_observer_fails() {
        let graph = Graph::new();
        let a = MockNode::new();
        let b = MockNode::new();
        let a_id = register(&graph, NodeKind::Reaction, &a);
        let b_id = register(&graph, NodeKind::Reaction, &b);

        assert_eq!(graph.end_observer(a_id), Err(GraphError::NoObserverStarted));

        graph.start_observer(a_id);
        graph.start_observer(b_id);
        assert_eq!(
            graph.end_observer(a_id),
            Err(GraphError::ObserverMismatch {
                node: a_id,
                active: b_id
            })
        );
        graph.end_observer(b_id).unwrap();
        graph.end_observer(a_id).unwrap();
    }
}
