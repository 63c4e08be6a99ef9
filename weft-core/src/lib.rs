//! Weft Core
//!
//! This crate provides the dependency-tracking graph at the heart of the
//! Weft reactive state runtime. It implements:
//!
//! - Reactive primitives (cells, computations, reactions, atoms)
//! - Transactions (batches and actions) that settle reactions once
//! - A task boundary for transactions that await asynchronous work
//! - Observed-state notifications for adapters that manage resources
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node arena and per-transaction bookkeeping
//! - `reactive`: the graph controller and the typed node handles
//! - `config`: construction-time settings
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use weft_core::reactive::{effect, Cell, Computation, Graph};
//!
//! let graph = Graph::new();
//!
//! // Create a cell
//! let count = Cell::new(&graph, 1);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = Computation::new(&graph, move || Ok(source.get() * 2));
//!
//! // Create an effect
//! let watched = doubled.clone();
//! let _logger = effect(&graph, move |_| {
//!     println!("doubled: {}", watched.get()?);
//!     Ok(())
//! })?;
//!
//! // Update the cell; the effect prints "doubled: 10"
//! count.set(5)?;
//! # Ok::<(), weft_core::GraphError>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::GraphConfig;
pub use error::GraphError;
pub use graph::NodeId;
pub use reactive::Graph;
