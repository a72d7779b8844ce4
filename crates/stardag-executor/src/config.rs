//! Executor configuration.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// What happens to the rest of the graph once a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Skip the failed node's descendants; independent branches keep running.
  #[default]
  FailIsolated,
  /// Stop dispatching anything new; work already running is allowed to finish.
  FailFast,
}

/// Configuration for the [`Executor`](crate::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
  /// Maximum number of nodes running at once. Zero is treated as one.
  #[serde(default = "default_max_parallelism")]
  pub max_parallelism: usize,

  #[serde(default)]
  pub failure_policy: FailurePolicy,

  /// Mark retry events as alerts.
  #[serde(default)]
  pub alert_on_retry: bool,
}

/// The host's available parallelism, or one if it cannot be determined.
pub fn default_max_parallelism() -> usize {
  std::thread::available_parallelism()
    .map(NonZeroUsize::get)
    .unwrap_or(1)
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_parallelism: default_max_parallelism(),
      failure_policy: FailurePolicy::default(),
      alert_on_retry: false,
    }
  }
}

impl ExecutorConfig {
  pub(crate) fn worker_slots(&self) -> usize {
    self.max_parallelism.max(1)
  }
}
