use serde::{Deserialize, Serialize};

use crate::operator::OperatorDef;
use crate::retry::RetryPolicy;

/// A node as written in a pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  #[serde(flatten)]
  pub operator: OperatorDef,
  /// Overrides the pipeline's default retry count.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
  /// Overrides the pipeline's default retry delay.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_delay_ms: Option<u64>,
}

impl NodeDef {
  pub fn new(node_id: impl Into<String>, operator: OperatorDef) -> Self {
    Self {
      node_id: node_id.into(),
      operator,
      retries: None,
      retry_delay_ms: None,
    }
  }
}

/// A node after run defaults have been merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
  pub node_id: String,
  pub operator: OperatorDef,
  pub retry: RetryPolicy,
}

impl NodeSpec {
  pub fn new(node_id: impl Into<String>, operator: OperatorDef, retry: RetryPolicy) -> Self {
    Self {
      node_id: node_id.into(),
      operator,
      retry,
    }
  }
}
