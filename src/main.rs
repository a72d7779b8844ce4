use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stardag_config::PipelineDef;
use stardag_executor::{
  ExecutorConfig, FailurePolicy, PipelineRunner, RunRequest, RunStatus, default_max_parallelism,
};
use stardag_graph::{NodeState, TaskGraph};
use stardag_warehouse::{EnvCredentialProvider, PgWarehouse};

/// Stardag - loads partitioned event data into a star schema and checks it
#[derive(Parser)]
#[command(name = "stardag")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Check a pipeline file and print its execution order
  Validate {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,
  },

  /// Run a pipeline for one logical date
  Run {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,

    /// Logical date of the run (RFC 3339), e.g. 2019-01-12T00:00:00Z
    #[arg(long)]
    logical_date: DateTime<Utc>,

    /// Run parameter, overrides the pipeline's params
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Warehouse connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Size of the warehouse connection pool
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Maximum number of nodes running at once [default: available CPUs]
    #[arg(long)]
    max_parallelism: Option<usize>,

    /// Stop dispatching new nodes after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// State file of an earlier run; its succeeded nodes are not run again
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Where to write the final node states
    #[arg(long)]
    state_out: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  match cli.command {
    Some(Commands::Validate { pipeline_file }) => validate(&pipeline_file)?,
    Some(Commands::Run {
      pipeline_file,
      logical_date,
      params,
      database_url,
      max_connections,
      max_parallelism,
      fail_fast,
      resume,
      state_out,
    }) => {
      let config = ExecutorConfig {
        max_parallelism: max_parallelism.unwrap_or_else(default_max_parallelism),
        failure_policy: if fail_fast {
          FailurePolicy::FailFast
        } else {
          FailurePolicy::FailIsolated
        },
        alert_on_retry: false,
      };
      let mut request = RunRequest::new(logical_date);
      request.params.extend(params);
      if let Some(path) = &resume {
        request.resume = Some(read_states(path)?);
      }

      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_pipeline(
        &pipeline_file,
        &database_url,
        max_connections,
        config,
        request,
        state_out.as_deref(),
      ))?;
    }
    None => {
      println!("stardag - use --help to see available commands");
    }
  }

  Ok(())
}

fn validate(pipeline_file: &Path) -> Result<()> {
  let pipeline = load_pipeline(pipeline_file)?;
  let graph = TaskGraph::from_pipeline(&pipeline)
    .with_context(|| format!("invalid pipeline: {}", pipeline_file.display()))?;

  eprintln!(
    "Pipeline '{}' is valid: {} nodes",
    pipeline.name,
    graph.len()
  );
  for node_id in graph.topological_order() {
    println!("{}", node_id);
  }

  Ok(())
}

async fn run_pipeline(
  pipeline_file: &Path,
  database_url: &str,
  max_connections: u32,
  config: ExecutorConfig,
  request: RunRequest,
  state_out: Option<&Path>,
) -> Result<()> {
  let pipeline = load_pipeline(pipeline_file)?;
  info!(pipeline = %pipeline.name, logical_date = %request.logical_date, "loaded pipeline");

  let warehouse = PgWarehouse::connect_lazy(database_url, max_connections)
    .context("failed to configure warehouse connection pool")?;
  let credentials = EnvCredentialProvider::from_env();
  let runner = PipelineRunner::new(pipeline, Arc::new(warehouse), Arc::new(credentials), config);

  // Ctrl-C stops dispatch; running nodes finish their current attempt.
  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling run");
      on_signal.cancel();
    }
  });

  let report = runner
    .execute_once(request, cancel)
    .await
    .context("pipeline run aborted")?;

  if let Some(path) = state_out {
    write_states(path, &report.states())?;
  }
  println!("{}", serde_json::to_string_pretty(&report)?);

  for node in report.failed_nodes() {
    eprintln!(
      "Failed: {} ({}) after {} attempt(s): {}",
      node.node_id,
      node.operator,
      node.attempts,
      node
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default()
    );
  }

  match report.status {
    RunStatus::Succeeded => Ok(()),
    status => bail!("run {} finished with status {:?}", report.run_id, status),
  }
}

fn load_pipeline(path: &Path) -> Result<PipelineDef> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read pipeline file: {}", path.display()))?;
  PipelineDef::from_json(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", path.display()))
}

fn read_states(path: &Path) -> Result<HashMap<String, NodeState>> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read state file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse state file: {}", path.display()))
}

fn write_states(path: &Path, states: &HashMap<String, NodeState>) -> Result<()> {
  let content = serde_json::to_string_pretty(states)?;
  std::fs::write(path, content)
    .with_context(|| format!("failed to write state file: {}", path.display()))
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
  }
}
