//! Reactive Primitives
//!
//! This module implements the reactive system on top of the dependency
//! graph: the [`Graph`] controller and the node handles that live in it.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell holds a value. Reading it while an observer runs makes that
//! observer depend on it; writing it queues every reaction downstream.
//!
//! ## Computations
//!
//! A Computation is a derived value that caches its result and re-derives
//! only when one of its inputs may have changed. A computation whose inputs
//! changed but whose output came out equal does not notify anyone.
//!
//! ## Reactions
//!
//! A Reaction runs a side effect whenever a dependency genuinely changes.
//! [`effect`] and [`reaction`] are the usual ways to create one.
//!
//! ## Transactions
//!
//! Writes are grouped in batches and actions. Reactions only run when the
//! outermost one ends, once per transaction, in the order they were queued.
//!
//! # Implementation Notes
//!
//! Each graph keeps an explicit stack of running observers. When a cell or
//! computation is read, the graph links it to the observer on top of that
//! stack. There is no global state; independent graphs never interact.

mod atom;
mod batch;
mod cell;
mod computation;
mod context;
mod effect;
mod reaction;
mod runtime;
mod subscriber;
mod task;

pub use atom::Atom;
pub use cell::{default_equals, Cell, EqualsFn};
pub use computation::{Computation, ComputationOptions, DeriveFn};
pub use effect::{effect, reaction};
pub use reaction::{Reaction, ReactionFn};
pub use runtime::Graph;
pub use subscriber::{Subscription, SubscriptionId};
