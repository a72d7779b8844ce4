//! Pipeline runner with channel-based triggering.
//!
//! The `PipelineRunner` owns a pipeline definition and an mpsc channel of
//! [`RunRequest`]s. Every request gets a freshly built [`TaskGraph`] and
//! [`ExecutionContext`]; nothing carries over between runs except what the
//! caller passes back in as a resume snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stardag_config::PipelineDef;
use stardag_graph::{GraphError, NodeState, TaskGraph};
use stardag_operators::ExecutionContext;
use stardag_warehouse::{CredentialProvider, Warehouse};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecutionError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::executor::Executor;
use crate::report::{RunReport, RunStatus};

#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("invalid pipeline graph: {0}")]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Execution(#[from] ExecutionError),

  #[error("pipeline runner channel closed")]
  ChannelClosed,
}

/// One run of a pipeline.
#[derive(Debug, Clone)]
pub struct RunRequest {
  pub logical_date: DateTime<Utc>,
  /// Merged over the pipeline's own params; the request wins.
  pub params: BTreeMap<String, String>,
  /// State snapshot of an earlier run to resume from.
  pub resume: Option<HashMap<String, NodeState>>,
}

impl RunRequest {
  pub fn new(logical_date: DateTime<Utc>) -> Self {
    Self {
      logical_date,
      params: BTreeMap::new(),
      resume: None,
    }
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  pub fn with_resume(mut self, states: HashMap<String, NodeState>) -> Self {
    self.resume = Some(states);
    self
  }
}

/// A runner that executes a pipeline in response to run requests.
///
/// # Usage
///
/// ```ignore
/// let runner = PipelineRunner::new(pipeline, warehouse, credentials, ExecutorConfig::default());
///
/// // Hand the sender to whatever decides when runs happen.
/// let sender = runner.sender();
///
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct PipelineRunner<N: ExecutionNotifier = NoopNotifier> {
  pipeline: Pipeline<N>,
  sender: mpsc::Sender<RunRequest>,
  receiver: mpsc::Receiver<RunRequest>,
}

/// The part of a runner that executes requests, kept apart from the receiver
/// so the run loop can borrow both.
struct Pipeline<N: ExecutionNotifier> {
  def: PipelineDef,
  executor: Executor<N>,
  credentials: Arc<dyn CredentialProvider>,
}

impl<N: ExecutionNotifier + 'static> Pipeline<N> {
  async fn execute(
    &self,
    request: RunRequest,
    cancel: CancellationToken,
  ) -> Result<RunReport, RunnerError> {
    let graph = TaskGraph::from_pipeline(&self.def)?;

    let mut params = self.def.params.clone();
    params.extend(request.params);
    let ctx = ExecutionContext::new(request.logical_date, self.credentials.clone()).with_params(params);

    let report = self
      .executor
      .run(&graph, &ctx, request.resume.as_ref(), cancel)
      .await?;
    Ok(report)
  }
}

impl PipelineRunner<NoopNotifier> {
  pub fn new(
    pipeline: PipelineDef,
    warehouse: Arc<dyn Warehouse>,
    credentials: Arc<dyn CredentialProvider>,
    config: ExecutorConfig,
  ) -> Self {
    Self::with_notifier(pipeline, warehouse, credentials, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> PipelineRunner<N> {
  /// Create a runner whose executor reports to `notifier`.
  ///
  /// The pipeline's `alert_on_retry` default is folded into `config`.
  pub fn with_notifier(
    pipeline: PipelineDef,
    warehouse: Arc<dyn Warehouse>,
    credentials: Arc<dyn CredentialProvider>,
    mut config: ExecutorConfig,
    notifier: N,
  ) -> Self {
    config.alert_on_retry |= pipeline.defaults.alert_on_retry;
    let (sender, receiver) = mpsc::channel(100);

    Self {
      pipeline: Pipeline {
        def: pipeline,
        executor: Executor::with_notifier(warehouse, config, notifier),
        credentials,
      },
      sender,
      receiver,
    }
  }

  /// Get a sender handle for triggering runs.
  pub fn sender(&self) -> mpsc::Sender<RunRequest> {
    self.sender.clone()
  }

  /// Queue a run through the channel.
  pub async fn trigger(&self, request: RunRequest) -> Result<(), RunnerError> {
    self
      .sender
      .send(request)
      .await
      .map_err(|_| RunnerError::ChannelClosed)
  }

  /// Start the run loop.
  ///
  /// Runs one request at a time until the cancellation token is triggered or
  /// the channel closes. A failing run is logged and does not stop the loop.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), RunnerError> {
    info!(pipeline = %self.pipeline.def.name, "starting pipeline runner");

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(pipeline = %self.pipeline.def.name, "pipeline runner cancelled");
          break;
        }
        request = self.receiver.recv() => {
          let Some(request) = request else {
            info!(pipeline = %self.pipeline.def.name, "pipeline runner channel closed");
            break;
          };

          let logical_date = request.logical_date;
          match self.pipeline.execute(request, cancel.child_token()).await {
            Ok(report) => match report.status {
              RunStatus::Succeeded => info!(
                pipeline = %self.pipeline.def.name,
                run_id = %report.run_id,
                logical_date = %logical_date,
                "pipeline run succeeded"
              ),
              RunStatus::Cancelled => warn!(
                pipeline = %self.pipeline.def.name,
                run_id = %report.run_id,
                "pipeline run cancelled"
              ),
              RunStatus::Failed => error!(
                pipeline = %self.pipeline.def.name,
                run_id = %report.run_id,
                failed_nodes = report.failed_nodes().count(),
                "pipeline run failed"
              ),
            },
            Err(e) => error!(
              pipeline = %self.pipeline.def.name,
              logical_date = %logical_date,
              error = %e,
              "pipeline run aborted"
            ),
          }
        }
      }
    }

    Ok(())
  }

  /// Execute a single run directly, without the channel.
  pub async fn execute_once(
    &self,
    request: RunRequest,
    cancel: CancellationToken,
  ) -> Result<RunReport, RunnerError> {
    self.pipeline.execute(request, cancel).await
  }

  pub fn pipeline(&self) -> &PipelineDef {
    &self.pipeline.def
  }
}
