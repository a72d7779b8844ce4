//! Run reports.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stardag_graph::NodeState;
use stardag_operators::{Metrics, OperatorError};

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  /// Every node succeeded.
  Succeeded,
  /// At least one node failed.
  Failed,
  /// The run was cancelled before every node could succeed, and nothing failed.
  Cancelled,
}

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
  pub node_id: String,
  /// Operator variant, e.g. `stage_load`.
  pub operator: String,
  pub state: NodeState,
  /// Attempts consumed in this run. Zero for skipped and resumed nodes.
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Metrics::is_empty")]
  pub metrics: Metrics,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<OperatorError>,
}

impl NodeReport {
  pub(crate) fn new(node_id: &str, operator: &str, state: NodeState) -> Self {
    Self {
      node_id: node_id.to_string(),
      operator: operator.to_string(),
      state,
      attempts: 0,
      metrics: Metrics::new(),
      error: None,
    }
  }

  /// The table implicated by a failure, if any.
  pub fn table(&self) -> Option<&str> {
    self.error.as_ref().and_then(OperatorError::table)
  }

  /// The column implicated by a failure, if any.
  pub fn column(&self) -> Option<&str> {
    self.error.as_ref().and_then(OperatorError::column)
  }
}

/// Outcome of a run, one entry per node in topological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub run_id: String,
  pub status: RunStatus,
  pub nodes: Vec<NodeReport>,
}

impl RunReport {
  pub fn node(&self, node_id: &str) -> Option<&NodeReport> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }

  pub fn state(&self, node_id: &str) -> Option<NodeState> {
    self.node(node_id).map(|n| n.state)
  }

  /// Snapshot of every node's final state, usable to resume a later run.
  pub fn states(&self) -> HashMap<String, NodeState> {
    self
      .nodes
      .iter()
      .map(|n| (n.node_id.clone(), n.state))
      .collect()
  }

  pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(|n| n.state == NodeState::Failed)
  }

  pub fn is_success(&self) -> bool {
    self.status == RunStatus::Succeeded
  }
}
