//! Task Boundary
//!
//! A task lets an open batch or action wait on asynchronous work without
//! holding the transaction open. Calling [`Graph::task`] closes the
//! innermost open batch or action (settling it if it was the outermost) and
//! returns a future that reopens an equivalent one once the wrapped future
//! completes.
//!
//! Tasks are meant to be used inside [`Graph::batch_async`] or
//! [`Graph::run_in_action_async`], which close whatever the last task
//! reopened. If the wrapped future fails, nothing is reopened and the
//! enclosing async scope skips its own close.
//!
//! ```rust
//! use weft_core::reactive::{Cell, Graph};
//! use weft_core::GraphError;
//!
//! # async fn run() -> Result<(), GraphError> {
//! let graph = Graph::new();
//! let status = Cell::new(&graph, "idle");
//!
//! graph
//!     .run_in_action_async(async {
//!         status.set("loading")?;
//!         let body = graph.task(async { Ok::<_, GraphError>("done") })?.await?;
//!         status.set(body)?;
//!         Ok::<_, GraphError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use super::runtime::Graph;
use crate::error::GraphError;

impl Graph {
    /// Suspend the open transaction around `future`.
    ///
    /// Fails if no batch or action is open.
    pub fn task<F, T, E>(&self, future: F) -> Result<impl Future<Output = Result<T, E>>, GraphError>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some((as_action, orphaned)) = self.begin_task() else {
            return Err(GraphError::TaskOutsideTransaction);
        };
        tracing::trace!(as_action, "closing transaction for task");
        self.end_transaction(as_action)?;

        let graph = self.clone();
        Ok(async move {
            let result = future.await;
            if graph.resume_after_task(as_action, &orphaned, result.is_err()) {
                tracing::trace!(as_action, "transaction reopened after task");
            }
            result
        })
    }

    /// Run `future` in a batch that may cross task boundaries.
    pub async fn batch_async<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<GraphError>,
    {
        self.run_async(future, false).await
    }

    /// Run `future` in an action that may cross task boundaries.
    pub async fn run_in_action_async<F, T, E>(&self, future: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<GraphError>,
    {
        self.run_async(future, true).await
    }

    async fn run_async<F, T, E>(&self, future: F, as_action: bool) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<GraphError>,
    {
        self.start_transaction(as_action);
        let result = future.await;

        // A failed task left the transaction closed.
        if self.take_task_rejected() {
            return result;
        }

        let ended = self.end_transaction(as_action);
        let value = result?;
        ended?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_outside_transaction_fails() {
        let graph = Graph::new();
        let result = graph.task(async { Ok::<_, GraphError>(()) });
        assert!(matches!(result, Err(GraphError::TaskOutsideTransaction)));
    }

    #[test]
    fn task_in_sync_scope_is_reported() {
        let graph = Graph::new();
        let result = graph.run_in_action(|| {
            let _pending = graph.task(async { Ok::<_, GraphError>(()) })?;
            Ok(())
        });

        assert_eq!(result, Err(GraphError::TaskInSyncTransaction));
        assert!(!graph.is_in_action());
        assert!(!graph.is_in_batch());
    }

    #[tokio::test]
    async fn task_closes_and_reopens_action() {
        let graph = Graph::new();

        let result = graph
            .run_in_action_async(async {
                assert!(graph.is_in_action());
                let pending = graph.task(async { Ok::<_, GraphError>(3) })?;
                assert!(!graph.is_in_action());

                let value = pending.await?;
                assert!(graph.is_in_action());
                Ok::<_, GraphError>(value)
            })
            .await;

        assert_eq!(result, Ok(3));
        assert!(!graph.is_in_action());
        assert!(!graph.is_in_batch());
    }

    #[tokio::test]
    async fn rejected_task_does_not_reopen() {
        let graph = Graph::new();

        let result: Result<(), GraphError> = graph
            .batch_async(async {
                graph
                    .task(async { Err::<(), _>(GraphError::derivation("offline")) })?
                    .await?;
                Ok::<_, GraphError>(())
            })
            .await;

        assert_eq!(result, Err(GraphError::derivation("offline")));
        assert!(!graph.is_in_batch());
    }
}
