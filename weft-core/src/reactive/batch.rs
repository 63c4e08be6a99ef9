//! Batches and Actions
//!
//! A batch collects changes without running reactions; only the outermost
//! batch settles. An action is a batch that also permits writes when
//! actions are enforced. Both nest freely.
//!
//! # Settlement
//!
//! Queued reactions are visited in the order they were queued. Before a
//! reaction runs, its dependencies are checked for a genuine change: cells
//! compare their current value with the value recorded before the first
//! write, computations re-derive and compare their output. A reaction
//! whose inputs all returned to their old values is skipped. Reactions may
//! write cells while running; anything they queue is visited in the same
//! pass.

use super::runtime::Graph;
use crate::error::GraphError;
use crate::graph::{NodeId, NodeKind};

impl Graph {
    pub fn start_batch(&self) {
        self.start_transaction(false);
    }

    /// End a batch, settling it if it is the outermost one.
    pub fn end_batch(&self) -> Result<(), GraphError> {
        if !self.begin_end_batch()? {
            return Ok(());
        }
        self.settle()
    }

    pub fn start_action(&self) {
        self.start_transaction(true);
    }

    pub fn end_action(&self) -> Result<(), GraphError> {
        self.end_action_depth()?;
        self.end_batch()
    }

    pub(crate) fn end_transaction(&self, as_action: bool) -> Result<(), GraphError> {
        if as_action {
            self.end_action()
        } else {
            self.end_batch()
        }
    }

    /// Run `f` in a batch. Reads inside `f` are tracked by the enclosing
    /// observer, if any.
    ///
    /// Reactions run once the outermost batch ends, even if `f` fails; the
    /// error from `f` takes precedence.
    pub fn batch<R>(&self, f: impl FnOnce() -> Result<R, GraphError>) -> Result<R, GraphError> {
        self.run(f, false, false)
    }

    /// Run `f` in an action. Reads inside `f` are untracked.
    pub fn run_in_action<R>(
        &self,
        f: impl FnOnce() -> Result<R, GraphError>,
    ) -> Result<R, GraphError> {
        self.run(f, true, true)
    }

    fn run<R>(
        &self,
        f: impl FnOnce() -> Result<R, GraphError>,
        untracked: bool,
        as_action: bool,
    ) -> Result<R, GraphError> {
        self.push_task_frame();
        self.start_transaction(as_action);

        let scope = ScopeGuard {
            graph: self,
            as_action,
            armed: true,
        };
        let result = if untracked { self.untracked(f) } else { f() };
        scope.disarm();

        if self.pop_task_frame() {
            // The task already closed this scope's transaction.
            return Err(GraphError::TaskInSyncTransaction);
        }

        let ended = self.end_transaction(as_action);
        let value = result?;
        ended?;
        Ok(value)
    }

    fn settle(&self) -> Result<(), GraphError> {
        tracing::debug!(queued = self.queued_len(), "settling transaction");

        let mut settlement = Settlement {
            graph: self,
            executed: 0,
            finished: false,
        };
        let result = self.drain_queue(&mut settlement.executed);
        settlement.finish();
        result
    }

    fn drain_queue(&self, executed: &mut usize) -> Result<(), GraphError> {
        while let Some(reaction) = self.next_queued() {
            if !self.has_changed(reaction)? {
                tracing::trace!(reaction = %reaction, "skipped, inputs unchanged");
                continue;
            }
            if let Some(node) = self.node_handle(reaction) {
                *executed += 1;
                node.react()?;
            }
        }
        Ok(())
    }

    /// Whether `node_id` produced a genuinely different value this
    /// transaction.
    fn has_changed(&self, node_id: NodeId) -> Result<bool, GraphError> {
        let Some(view) = self.settlement_view(node_id) else {
            return Ok(false);
        };

        match view.kind {
            NodeKind::Cell => {
                let changed = match self.node_handle(node_id) {
                    Some(node) => !node.equals_snapshot(view.snapshot.as_ref())?,
                    None => false,
                };
                if !changed {
                    self.confirm_unchanged(node_id);
                }
                Ok(changed)
            }
            NodeKind::Computation => {
                if !self.any_dependency_changed(&view.observing)? {
                    self.confirm_unchanged(node_id);
                    return Ok(false);
                }
                match self.node_handle(node_id) {
                    Some(node) => Ok(!node.equals_snapshot(view.snapshot.as_ref())?),
                    None => Ok(false),
                }
            }
            NodeKind::Reaction => self.any_dependency_changed(&view.observing),
        }
    }

    fn any_dependency_changed(&self, observing: &[NodeId]) -> Result<bool, GraphError> {
        for &observed in observing {
            if self.is_changed(observed) && self.has_changed(observed)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Closes the outermost transaction even if a reaction fails or panics.
struct Settlement<'g> {
    graph: &'g Graph,
    executed: usize,
    finished: bool,
}

impl Settlement<'_> {
    fn finish(mut self) {
        self.complete();
    }

    fn complete(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let callbacks = self.graph.finish_transaction(self.executed > 0);
        tracing::debug!(executed = self.executed, "transaction settled");
        for callback in callbacks {
            callback();
        }
    }
}

impl Drop for Settlement<'_> {
    fn drop(&mut self) {
        self.complete();
    }
}

/// Unwinds a synchronous scope whose body panicked.
struct ScopeGuard<'g> {
    graph: &'g Graph,
    as_action: bool,
    armed: bool,
}

impl ScopeGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.graph.abandon_transaction(self.as_action);
        }
    }
}
