//! Execution events and notifiers for observability.
//!
//! Events are emitted while a run executes so consumers can observe progress,
//! persist per-node history, raise alerts on retries, or assert ordering in
//! tests.

use serde::{Deserialize, Serialize};
use stardag_operators::Metrics;
use tokio::sync::mpsc;

use crate::report::RunStatus;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A run has started.
  RunStarted { run_id: String, nodes: usize },

  /// An attempt of a node has started. Attempts count from 1.
  NodeStarted {
    run_id: String,
    node_id: String,
    attempt: u32,
  },

  /// An attempt failed with a retryable error and will be retried after
  /// `delay_ms`.
  NodeRetrying {
    run_id: String,
    node_id: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
    alert: bool,
  },

  /// A node has completed successfully.
  NodeSucceeded {
    run_id: String,
    node_id: String,
    attempts: u32,
    metrics: Metrics,
  },

  /// A node has failed for good.
  NodeFailed {
    run_id: String,
    node_id: String,
    attempts: u32,
    error: String,
  },

  /// A node will not run. `cause` is the failed node, or the reason dispatch
  /// stopped.
  NodeSkipped {
    run_id: String,
    node_id: String,
    cause: String,
  },

  /// The run has finished.
  RunCompleted { run_id: String, status: RunStatus },
}

/// Trait for receiving execution events.
///
/// The executor calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the executor. Volume is a
  // handful of events per node.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // The receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
