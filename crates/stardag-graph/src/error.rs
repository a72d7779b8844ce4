use thiserror::Error;

/// Configuration errors detected while building a task graph.
///
/// All of these are fatal: a run never starts from an invalid graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("duplicate node id: {node_id}")]
  DuplicateIdentity { node_id: String },

  #[error("edge references unknown node '{missing}': from={from}, to={to}")]
  DanglingEdge {
    from: String,
    to: String,
    missing: String,
  },

  #[error("cycle detected between nodes: {}", .nodes.join(", "))]
  Cycle { nodes: Vec<String> },

  #[error(
    "quality check '{node_id}' audits table '{table}' but is not downstream of its load '{load_node_id}'"
  )]
  UnguardedQualityCheck {
    node_id: String,
    load_node_id: String,
    table: String,
  },
}
