//! Error Types
//!
//! Every failure the graph can report is a local, synchronous error returned
//! to the caller that triggered it. Nothing here is retried internally.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised by the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A computation re-entered its own derivation.
    #[error("cycle detected while deriving computation {node}")]
    Cycle { node: NodeId },

    /// An observed node was written while it was being read by the running
    /// observer, or while a computation was deriving.
    #[error("can't change node {node} during a reaction or within a computation")]
    WriteDuringRead { node: NodeId },

    /// An observed node was written outside of an action while strict
    /// actions are enforced.
    #[error("strict actions are enforced: attempted to modify observed node {node} outside of an action")]
    ActionRequired { node: NodeId },

    /// `end` was called with no observer on the stack.
    #[error("attempted to end an observer but one has not yet been started")]
    NoObserverStarted,

    /// `end` was called for an observer that is not on top of the stack.
    #[error("attempted to end observer {node} but {active} is the running observer")]
    ObserverMismatch { node: NodeId, active: NodeId },

    /// A batch or action was ended without a matching start.
    #[error("attempted to end a batch/action that has not been started")]
    NoTransaction,

    /// `task` was called with no batch or action open.
    #[error("task can only be used inside an open batch or action")]
    TaskOutsideTransaction,

    /// `task` was called inside a synchronous batch or action, which can't
    /// stay open until the task settles.
    #[error("task was used inside a synchronous batch or action; use an async scope instead")]
    TaskInSyncTransaction,

    /// A node id that is not registered with this graph.
    #[error("node {0} is not registered with this graph")]
    UnknownNode(NodeId),

    /// A failure raised by user code inside a derivation or reaction.
    #[error("derivation failed: {0}")]
    Derivation(String),
}

impl GraphError {
    /// Build a [`GraphError::Derivation`] from any displayable message.
    pub fn derivation(message: impl std::fmt::Display) -> Self {
        Self::Derivation(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_node() {
        let node = NodeId::from(7);
        let err = GraphError::Cycle { node };
        assert_eq!(err.to_string(), "cycle detected while deriving computation #7");

        let err = GraphError::ObserverMismatch {
            node,
            active: NodeId::from(9),
        };
        assert!(err.to_string().contains("#9"));
    }

    #[test]
    fn derivation_helper_formats_message() {
        let err = GraphError::derivation(format_args!("bad input {}", 3));
        assert_eq!(err, GraphError::Derivation("bad input 3".to_string()));
    }
}
