//! Stardag Graph
//!
//! This crate turns a pipeline's nodes and edges into a validated [`TaskGraph`].
//!
//! Building the graph is the only place configuration errors are detected:
//! - duplicate node identities
//! - edges that reference unknown nodes
//! - cycles (found with Kahn's algorithm while computing the topological order)
//! - quality checks that could run before a load of a table they audit
//!
//! A graph is built fresh for every run and is immutable afterwards; execution
//! state lives with the executor and is passed in when asking for the ready set.

mod error;
mod graph;
mod node;

pub use error::GraphError;
pub use graph::TaskGraph;
pub use node::{NodeState, TaskNode};
