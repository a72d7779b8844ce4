use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::{NodeDef, NodeSpec};
use crate::retry::RetryPolicy;

/// A pipeline definition: nodes, edges and the run defaults shared by nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub defaults: RunDefaults,
  /// Run-scoped parameters available to templates as `params.<name>`.
  #[serde(default)]
  pub params: BTreeMap<String, String>,
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<Edge>,
}

/// Defaults the host runtime applies uniformly to every node of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDefaults {
  #[serde(default = "default_retries")]
  pub retries: u32,
  #[serde(default = "default_retry_delay_ms")]
  pub retry_delay_ms: u64,
  #[serde(default)]
  pub alert_on_retry: bool,
  /// Whether the host scheduler backfills missed runs.
  #[serde(default)]
  pub catchup: bool,
  /// Schedule expression understood by the host scheduler, e.g. `@hourly`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schedule: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner: Option<String>,
}

fn default_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  5 * 60 * 1000
}

impl Default for RunDefaults {
  fn default() -> Self {
    Self {
      retries: default_retries(),
      retry_delay_ms: default_retry_delay_ms(),
      alert_on_retry: false,
      catchup: false,
      schedule: None,
      owner: None,
    }
  }
}

impl RunDefaults {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::from_retries(self.retries, Duration::from_millis(self.retry_delay_ms))
  }
}

impl PipelineDef {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Merge the run defaults into every node.
  ///
  /// A value set on the node wins over the pipeline default.
  pub fn apply_defaults(&self) -> Vec<NodeSpec> {
    self
      .nodes
      .iter()
      .map(|node| {
        let retries = node.retries.unwrap_or(self.defaults.retries);
        let delay_ms = node.retry_delay_ms.unwrap_or(self.defaults.retry_delay_ms);
        NodeSpec::new(
          node.node_id.clone(),
          node.operator.clone(),
          RetryPolicy::from_retries(retries, Duration::from_millis(delay_ms)),
        )
      })
      .collect()
  }
}
