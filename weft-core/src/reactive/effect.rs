//! Effects and Derived Reactions
//!
//! Convenience constructors built on [`Reaction`].
//!
//! - [`effect`] runs a closure immediately and again whenever anything it
//!   read changes.
//! - [`reaction`] splits the work in two: a tracked closure that produces a
//!   value, and a callback that only runs when that value differs from the
//!   previous one.
//!
//! Both return the underlying [`Reaction`]; dispose it (or drop every
//! handle) to stop.

use std::sync::Arc;

use parking_lot::Mutex;

use super::cell::default_equals;
use super::reaction::Reaction;
use super::runtime::Graph;
use crate::error::GraphError;

/// Run `f` now and re-run it whenever its dependencies change.
///
/// # Example
///
/// ```rust
/// use weft_core::reactive::{effect, Cell, Graph};
///
/// let graph = Graph::new();
/// let count = Cell::new(&graph, 0);
///
/// let source = count.clone();
/// let logger = effect(&graph, move |_| {
///     println!("count is {}", source.get());
///     Ok(())
/// })?;
///
/// count.set(5)?;
/// assert_eq!(logger.run_count(), 1);
/// # Ok::<(), weft_core::GraphError>(())
/// ```
pub fn effect<F>(graph: &Graph, f: F) -> Result<Reaction, GraphError>
where
    F: Fn(&Reaction) -> Result<(), GraphError> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let run = f.clone();
    let reaction = Reaction::new(graph, move |reaction| reaction.track(|| run(reaction)));

    reaction.track(|| f(&reaction))?;
    Ok(reaction)
}

/// Track `track` and call `callback` with its value whenever that value
/// changes.
///
/// The callback does not run for the initial value.
pub fn reaction<T, Track, Callback>(
    graph: &Graph,
    track: Track,
    callback: Callback,
) -> Result<Reaction, GraphError>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    Track: Fn() -> Result<T, GraphError> + Send + Sync + 'static,
    Callback: Fn(&T, &Reaction) -> Result<(), GraphError> + Send + Sync + 'static,
{
    let track = Arc::new(track);
    let last: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

    let rerun = track.clone();
    let previous = last.clone();
    let handle = Reaction::new(graph, move |reaction| {
        let value = reaction.track(|| rerun())?;

        let changed = {
            let mut previous = previous.lock();
            let changed = previous
                .as_ref()
                .map_or(true, |previous| !default_equals(previous, &value));
            if changed {
                *previous = Some(value.clone());
            }
            changed
        };

        if changed {
            callback(&value, reaction)?;
        }
        Ok(())
    });

    let initial = handle.track(|| track())?;
    *last.lock() = Some(initial);
    Ok(handle)
}
