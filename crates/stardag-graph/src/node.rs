use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stardag_config::{OperatorDef, RetryPolicy};

/// Execution state of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
  Pending,
  Ready,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl NodeState {
  /// Whether the node will not change state again in this run.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
    )
  }
}

/// A node of a built graph: its operator plus both edge directions.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
  pub node_id: String,
  pub operator: OperatorDef,
  pub retry: RetryPolicy,
  pub upstream: BTreeSet<String>,
  pub downstream: BTreeSet<String>,
}
