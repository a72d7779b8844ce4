//! Stardag Config
//!
//! This crate contains the serializable pipeline configuration types for stardag.
//! These types describe a load pipeline before it is turned into a task graph:
//! which operator each node runs, the literal table names it touches, and the
//! edges between nodes.
//!
//! Configuration is loaded from JSON files (via the CLI). Run defaults declared
//! on the pipeline are merged into every node exactly once, by
//! [`PipelineDef::apply_defaults`], before the graph is built.

mod edge;
mod node;
mod operator;
mod pipeline;
mod retry;

pub use edge::Edge;
pub use node::{NodeDef, NodeSpec};
pub use operator::{
  ColumnSpec, DimensionLoadDef, FactLoadDef, FormatHint, OperatorDef, QualityCheckDef,
  StageLoadDef,
};
pub use pipeline::{PipelineDef, RunDefaults};
pub use retry::RetryPolicy;
