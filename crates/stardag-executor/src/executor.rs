//! Graph execution.
//!
//! The executor walks a [`TaskGraph`] with AND-join semantics: a node is
//! dispatched only once every upstream node has succeeded. Independent ready
//! nodes run concurrently on a `JoinSet`, bounded by
//! [`ExecutorConfig::max_parallelism`]. Each node's retries happen inside its
//! own task, so a node sleeping between attempts never blocks the others.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use stardag_config::{OperatorDef, RetryPolicy};
use stardag_graph::{NodeState, TaskGraph};
use stardag_operators::{ExecutionContext, Operator, OperatorError, OperatorResult, OperatorStatus};
use stardag_warehouse::Warehouse;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::config::{ExecutorConfig, FailurePolicy};
use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::report::{NodeReport, RunReport, RunStatus};

/// Runs task graphs against a warehouse.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `Executor::new()` to discard events, or
/// `Executor::with_notifier()` to observe them.
pub struct Executor<N: ExecutionNotifier = NoopNotifier> {
  warehouse: Arc<dyn Warehouse>,
  config: ExecutorConfig,
  notifier: Arc<N>,
}

impl Executor<NoopNotifier> {
  pub fn new(warehouse: Arc<dyn Warehouse>, config: ExecutorConfig) -> Self {
    Self::with_notifier(warehouse, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> Executor<N> {
  pub fn with_notifier(warehouse: Arc<dyn Warehouse>, config: ExecutorConfig, notifier: N) -> Self {
    Self {
      warehouse,
      config,
      notifier: Arc::new(notifier),
    }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// Execute `graph` to completion.
  ///
  /// `initial` resumes a previous run: nodes recorded as `Succeeded` are not
  /// run again, every other recorded state starts over as `Pending`.
  ///
  /// Node failures do not make this return `Err`; they are reported in the
  /// returned [`RunReport`].
  #[instrument(
    name = "run_execute",
    skip_all,
    fields(run_id = %ctx.run_id(), nodes = graph.len())
  )]
  pub async fn run(
    &self,
    graph: &TaskGraph,
    ctx: &ExecutionContext,
    initial: Option<&HashMap<String, NodeState>>,
    cancel: CancellationToken,
  ) -> Result<RunReport, ExecutionError> {
    let run_id = ctx.run_id().to_string();
    let mut run = RunState::new(graph, initial)?;

    info!(run_id = %run_id, nodes = graph.len(), resumed = run.resumed, "run_started");
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      nodes: graph.len(),
    });

    let mut running: JoinSet<NodeOutcome> = JoinSet::new();
    let mut halted = false;

    loop {
      if !halted && !cancel.is_cancelled() {
        for node_id in graph.ready_set(&run.states) {
          run.set(&node_id, NodeState::Ready);
        }
        self.dispatch(graph, ctx, &mut run, &mut running, &cancel);
      }

      let Some(joined) = running.join_next().await else {
        break;
      };
      let outcome = joined.map_err(|e| ExecutionError::TaskJoin {
        message: e.to_string(),
      })?;

      let succeeded = self.settle(graph, &run_id, &mut run, outcome);
      if !succeeded && !halted && self.config.failure_policy == FailurePolicy::FailFast {
        warn!(run_id = %run_id, "failure under fail-fast policy, halting dispatch");
        halted = true;
      }
    }

    // Anything never dispatched was held back by fail-fast or cancellation.
    let cause = if cancel.is_cancelled() {
      "cancelled"
    } else {
      "fail_fast"
    };
    for node_id in graph.topological_order() {
      if matches!(run.states[node_id], NodeState::Pending | NodeState::Ready) {
        self.skip(&run_id, &mut run, node_id, cause);
      }
    }

    let status = run.status(cancel.is_cancelled());
    match status {
      RunStatus::Succeeded => info!(run_id = %run_id, "run_completed"),
      RunStatus::Failed => error!(run_id = %run_id, "run_failed"),
      RunStatus::Cancelled => warn!(run_id = %run_id, "run_cancelled"),
    }
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id: run_id.clone(),
      status,
    });

    Ok(run.into_report(graph, run_id, status))
  }

  /// Spawn ready nodes, in topological order, while worker slots are free.
  fn dispatch(
    &self,
    graph: &TaskGraph,
    ctx: &ExecutionContext,
    run: &mut RunState,
    running: &mut JoinSet<NodeOutcome>,
    cancel: &CancellationToken,
  ) {
    for node in graph.nodes() {
      if running.len() >= self.config.worker_slots() {
        break;
      }
      if run.states[&node.node_id] != NodeState::Ready {
        continue;
      }

      run.set(&node.node_id, NodeState::Running);

      let task = NodeTask {
        node_id: node.node_id.clone(),
        operator: node.operator.clone(),
        retry: node.retry,
        ctx: ctx.clone(),
        warehouse: self.warehouse.clone(),
        notifier: self.notifier.clone(),
        alert_on_retry: self.config.alert_on_retry,
        cancel: cancel.clone(),
      };
      let span = info_span!("node_execute", run_id = %ctx.run_id(), node_id = %node.node_id);
      running.spawn(task.run().instrument(span));
    }
  }

  /// Record a finished node. Returns false if the node failed.
  fn settle(
    &self,
    graph: &TaskGraph,
    run_id: &str,
    run: &mut RunState,
    outcome: NodeOutcome,
  ) -> bool {
    let NodeOutcome {
      node_id,
      attempts,
      result,
    } = outcome;

    let report = run.report_mut(&node_id);
    report.attempts = attempts;
    report.metrics = result.metrics.clone();

    if result.is_success() {
      info!(run_id = %run_id, node_id = %node_id, attempts, "node_succeeded");
      run.set(&node_id, NodeState::Succeeded);
      self.notifier.notify(ExecutionEvent::NodeSucceeded {
        run_id: run_id.to_string(),
        node_id,
        attempts,
        metrics: result.metrics,
      });
      return true;
    }

    let message = result
      .error
      .as_ref()
      .map(ToString::to_string)
      .unwrap_or_else(|| "operator failed without detail".to_string());
    error!(run_id = %run_id, node_id = %node_id, attempts, error = %message, "node_failed");

    run.report_mut(&node_id).error = result.error;
    run.set(&node_id, NodeState::Failed);
    self.notifier.notify(ExecutionEvent::NodeFailed {
      run_id: run_id.to_string(),
      node_id: node_id.clone(),
      attempts,
      error: message,
    });

    // AND-join: nothing below a failed node can ever become ready.
    let descendants = graph.descendants(&node_id);
    for descendant in graph.topological_order() {
      if descendants.contains(descendant)
        && matches!(run.states[descendant], NodeState::Pending | NodeState::Ready)
      {
        self.skip(run_id, run, descendant, &node_id);
      }
    }

    false
  }

  fn skip(&self, run_id: &str, run: &mut RunState, node_id: &str, cause: &str) {
    info!(run_id = %run_id, node_id = %node_id, cause = %cause, "node_skipped");
    run.set(node_id, NodeState::Skipped);
    self.notifier.notify(ExecutionEvent::NodeSkipped {
      run_id: run_id.to_string(),
      node_id: node_id.to_string(),
      cause: cause.to_string(),
    });
  }
}

/// Per-run bookkeeping owned by the dispatch loop.
struct RunState {
  states: HashMap<String, NodeState>,
  reports: HashMap<String, NodeReport>,
  resumed: usize,
}

impl RunState {
  fn new(
    graph: &TaskGraph,
    initial: Option<&HashMap<String, NodeState>>,
  ) -> Result<Self, ExecutionError> {
    let mut states: HashMap<String, NodeState> = graph
      .nodes()
      .map(|node| (node.node_id.clone(), NodeState::Pending))
      .collect();

    let mut resumed = 0;
    if let Some(initial) = initial {
      for (node_id, state) in initial {
        if !graph.contains(node_id) {
          return Err(ExecutionError::UnknownNode {
            node_id: node_id.clone(),
          });
        }
        if *state == NodeState::Succeeded {
          states.insert(node_id.clone(), NodeState::Succeeded);
          resumed += 1;
        }
      }
    }

    let reports = graph
      .nodes()
      .map(|node| {
        let report = NodeReport::new(&node.node_id, node.operator.kind(), states[&node.node_id]);
        (node.node_id.clone(), report)
      })
      .collect();

    Ok(Self {
      states,
      reports,
      resumed,
    })
  }

  fn set(&mut self, node_id: &str, state: NodeState) {
    self.states.insert(node_id.to_string(), state);
    if let Some(report) = self.reports.get_mut(node_id) {
      report.state = state;
    }
  }

  fn report_mut(&mut self, node_id: &str) -> &mut NodeReport {
    self
      .reports
      .entry(node_id.to_string())
      .or_insert_with(|| NodeReport::new(node_id, "unknown", NodeState::Pending))
  }

  fn status(&self, cancelled: bool) -> RunStatus {
    if self.states.values().any(|s| *s == NodeState::Failed) {
      RunStatus::Failed
    } else if self.states.values().all(|s| *s == NodeState::Succeeded) {
      RunStatus::Succeeded
    } else if cancelled {
      RunStatus::Cancelled
    } else {
      RunStatus::Failed
    }
  }

  fn into_report(mut self, graph: &TaskGraph, run_id: String, status: RunStatus) -> RunReport {
    let nodes = graph
      .topological_order()
      .iter()
      .filter_map(|node_id| self.reports.remove(node_id))
      .collect();

    RunReport {
      run_id,
      status,
      nodes,
    }
  }
}

/// Final result of one node's attempts.
struct NodeOutcome {
  node_id: String,
  attempts: u32,
  result: OperatorResult,
}

/// Everything a spawned node needs, owned so it can cross the spawn boundary.
struct NodeTask<N> {
  node_id: String,
  operator: OperatorDef,
  retry: RetryPolicy,
  ctx: ExecutionContext,
  warehouse: Arc<dyn Warehouse>,
  notifier: Arc<N>,
  alert_on_retry: bool,
  cancel: CancellationToken,
}

impl<N: ExecutionNotifier> NodeTask<N> {
  async fn run(self) -> NodeOutcome {
    let run_id = self.ctx.run_id().to_string();
    let mut attempt = 0;

    loop {
      attempt += 1;
      info!(run_id = %run_id, node_id = %self.node_id, attempt, "node_started");
      self.notifier.notify(ExecutionEvent::NodeStarted {
        run_id: run_id.clone(),
        node_id: self.node_id.clone(),
        attempt,
      });

      let result = AssertUnwindSafe(self.operator.run(&self.ctx, self.warehouse.as_ref()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
          OperatorResult::failed(OperatorError::Panicked {
            message: panic_message(panic.as_ref()),
          })
        });

      let exhausted = attempt >= self.retry.max_attempts;
      if result.status != OperatorStatus::RetryableFailure || exhausted {
        return self.outcome(attempt, result);
      }

      let error = result
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
      let delay_ms = u64::try_from(self.retry.delay.as_millis()).unwrap_or(u64::MAX);
      warn!(
        run_id = %run_id,
        node_id = %self.node_id,
        attempt,
        max_attempts = self.retry.max_attempts,
        delay_ms,
        error = %error,
        "node_retrying"
      );
      self.notifier.notify(ExecutionEvent::NodeRetrying {
        run_id: run_id.clone(),
        node_id: self.node_id.clone(),
        attempt,
        delay_ms,
        error,
        alert: self.alert_on_retry,
      });

      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          warn!(run_id = %run_id, node_id = %self.node_id, attempt, "retry abandoned on cancellation");
          return self.outcome(attempt, result);
        }
        _ = tokio::time::sleep(self.retry.delay) => {}
      }
    }
  }

  fn outcome(&self, attempts: u32, result: OperatorResult) -> NodeOutcome {
    NodeOutcome {
      node_id: self.node_id.clone(),
      attempts,
      result,
    }
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
