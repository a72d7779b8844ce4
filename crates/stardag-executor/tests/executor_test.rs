//! Executor behaviour over the in-memory warehouse.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use stardag_config::{
  ColumnSpec, DimensionLoadDef, Edge, FactLoadDef, FormatHint, NodeSpec, OperatorDef,
  PipelineDef, QualityCheckDef, RetryPolicy, StageLoadDef,
};
use stardag_executor::{
  ChannelNotifier, ExecutionError, ExecutionEvent, Executor, ExecutorConfig, FailurePolicy,
  PipelineRunner, RunRequest, RunStatus, RunnerError,
};
use stardag_graph::{GraphError, NodeState, TaskGraph};
use stardag_operators::{ExecutionContext, OperatorError, null_count_query, row_count_query};
use stardag_warehouse::{
  Connection, Credentials, MemoryWarehouse, StaticCredentialProvider, Warehouse, WarehouseError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn ctx() -> ExecutionContext {
  let credentials =
    StaticCredentialProvider::new().with("aws_credentials", Credentials::new("KEY", "SECRET"));
  ExecutionContext::new(
    Utc.with_ymd_and_hms(2019, 1, 12, 0, 0, 0).unwrap(),
    Arc::new(credentials),
  )
}

fn stage(table: &str) -> OperatorDef {
  OperatorDef::StageLoad(StageLoadDef {
    source_location_template: format!("s3://bucket/{}/{{{{ ds }}}}", table),
    destination_table: table.to_string(),
    overwrite: false,
    format: FormatHint::default(),
    credentials_id: "aws_credentials".to_string(),
    region: None,
  })
}

fn fact(table: &str) -> OperatorDef {
  OperatorDef::FactLoad(FactLoadDef {
    insert_select: "SELECT * FROM staging_events".to_string(),
    target_table: table.to_string(),
  })
}

fn dim(table: &str, overwrite: bool) -> OperatorDef {
  OperatorDef::DimensionLoad(DimensionLoadDef {
    insert_select: "SELECT DISTINCT * FROM staging_songs".to_string(),
    target_table: table.to_string(),
    overwrite,
  })
}

fn quality(tables: serde_json::Value) -> OperatorDef {
  OperatorDef::QualityCheck(QualityCheckDef {
    tables: serde_json::from_value::<BTreeMap<String, ColumnSpec>>(tables).unwrap(),
  })
}

fn node(node_id: &str, operator: OperatorDef) -> NodeSpec {
  NodeSpec::new(node_id, operator, RetryPolicy::once())
}

fn build(nodes: Vec<NodeSpec>, edges: &[(&str, &str)]) -> TaskGraph {
  let edges: Vec<Edge> = edges.iter().map(|(from, to)| Edge::new(*from, *to)).collect();
  TaskGraph::build(nodes, &edges).unwrap()
}

fn config(max_parallelism: usize, failure_policy: FailurePolicy) -> ExecutorConfig {
  ExecutorConfig {
    max_parallelism,
    failure_policy,
    alert_on_retry: false,
  }
}

fn observed(
  warehouse: &MemoryWarehouse,
  config: ExecutorConfig,
) -> (
  Executor<ChannelNotifier>,
  mpsc::UnboundedReceiver<ExecutionEvent>,
) {
  let (tx, rx) = mpsc::unbounded_channel();
  let executor = Executor::with_notifier(
    Arc::new(warehouse.clone()),
    config,
    ChannelNotifier::new(tx),
  );
  (executor, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

fn position(events: &[ExecutionEvent], pred: impl Fn(&ExecutionEvent) -> bool) -> Option<usize> {
  events.iter().position(pred)
}

fn started(node: &str) -> impl Fn(&ExecutionEvent) -> bool + '_ {
  move |e| matches!(e, ExecutionEvent::NodeStarted { node_id, .. } if node_id == node)
}

fn succeeded(node: &str) -> impl Fn(&ExecutionEvent) -> bool + '_ {
  move |e| matches!(e, ExecutionEvent::NodeSucceeded { node_id, .. } if node_id == node)
}

/// Start → StageA, StageB → Fact → DimX, DimY → Quality → End
fn warehouse_graph() -> TaskGraph {
  build(
    vec![
      node("start", OperatorDef::NoOp),
      node("stage_a", stage("staging_events")),
      node("stage_b", stage("staging_songs")),
      node("fact", fact("songplays")),
      node("dim_x", dim("users", true)),
      node("dim_y", dim("songs", true)),
      node("quality", quality(json!({ "users": "userid", "songs": ["songid", "artistid"] }))),
      node("end", OperatorDef::NoOp),
    ],
    &[
      ("start", "stage_a"),
      ("start", "stage_b"),
      ("stage_a", "fact"),
      ("stage_b", "fact"),
      ("fact", "dim_x"),
      ("fact", "dim_y"),
      ("dim_x", "quality"),
      ("dim_y", "quality"),
      ("quality", "end"),
    ],
  )
}

fn healthy_warehouse() -> MemoryWarehouse {
  MemoryWarehouse::new()
    .with_table_rows("staging_events", 8056)
    .with_table_rows("staging_songs", 14896)
    .with_table_rows("songplays", 6820)
    .with_table_rows("users", 104)
    .with_table_rows("songs", 14896)
    .respond(&row_count_query("users"), vec![vec![json!(104)]])
    .respond(&null_count_query("users", "userid"), vec![vec![json!(0)]])
    .respond(&row_count_query("songs"), vec![vec![json!(14896)]])
    .respond(&null_count_query("songs", "songid"), vec![vec![json!(0)]])
    .respond(&null_count_query("songs", "artistid"), vec![vec![json!(0)]])
}

#[tokio::test]
async fn test_end_to_end_all_succeed() {
  let warehouse = healthy_warehouse().with_latency(Duration::from_millis(2));
  let (executor, mut rx) = observed(&warehouse, config(4, FailurePolicy::FailIsolated));
  let graph = warehouse_graph();

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Succeeded);
  assert!(report.nodes.iter().all(|n| n.state == NodeState::Succeeded));
  assert_eq!(report.node("fact").unwrap().metrics["rows_loaded"], 6820);
  assert_eq!(report.node("quality").unwrap().metrics["rows.users"], 104);

  let events = drain(&mut rx);
  let quality_starts = events.iter().filter(|e| started("quality")(*e)).count();
  assert_eq!(quality_starts, 1);

  let quality_at = position(&events, started("quality")).unwrap();
  assert!(position(&events, succeeded("dim_x")).unwrap() < quality_at);
  assert!(position(&events, succeeded("dim_y")).unwrap() < quality_at);

  // Every connection went back to the pool.
  assert_eq!(warehouse.active_connections(), 0);
}

#[tokio::test]
async fn test_node_never_starts_before_upstreams_succeed() {
  let warehouse = healthy_warehouse().with_latency(Duration::from_millis(3));
  let (executor, mut rx) = observed(&warehouse, config(8, FailurePolicy::FailIsolated));
  let graph = warehouse_graph();

  executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();
  let events = drain(&mut rx);

  for node in graph.nodes() {
    let start = position(&events, started(&node.node_id)).unwrap();
    for upstream in graph.upstream(&node.node_id) {
      let done = position(&events, succeeded(upstream)).unwrap();
      assert!(
        done < start,
        "{} started before {} succeeded",
        node.node_id,
        upstream
      );
    }
  }

  // Topological order is a valid linearization.
  let order = graph.topological_order();
  for node in graph.nodes() {
    let at = order.iter().position(|id| *id == node.node_id).unwrap();
    for upstream in graph.upstream(&node.node_id) {
      assert!(order.iter().position(|id| id == upstream).unwrap() < at);
    }
  }
}

#[tokio::test]
async fn test_retryable_failure_exhausts_attempts_and_skips_downstream() {
  let warehouse = MemoryWarehouse::new()
    .with_table("staging_events")
    .with_table("songplays")
    .fail_matching("COPY", WarehouseError::connection("connection reset by peer"));
  let (executor, mut rx) = observed(&warehouse, config(4, FailurePolicy::FailIsolated));
  let graph = build(
    vec![
      node("start", OperatorDef::NoOp),
      NodeSpec::new(
        "stage",
        stage("staging_events"),
        RetryPolicy::new(3, Duration::from_millis(1)),
      ),
      node("fact", fact("songplays")),
      node("end", OperatorDef::NoOp),
    ],
    &[("start", "stage"), ("stage", "fact"), ("fact", "end")],
  );

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(warehouse.count_matching("COPY"), 3);
  assert_eq!(report.status, RunStatus::Failed);

  let stage = report.node("stage").unwrap();
  assert_eq!(stage.state, NodeState::Failed);
  assert_eq!(stage.attempts, 3);
  assert_eq!(stage.operator, "stage_load");
  assert!(matches!(stage.error, Some(OperatorError::Connection { .. })));

  assert_eq!(report.state("start"), Some(NodeState::Succeeded));
  assert_eq!(report.state("fact"), Some(NodeState::Skipped));
  assert_eq!(report.state("end"), Some(NodeState::Skipped));
  assert_eq!(warehouse.count_matching("INSERT"), 0);

  let events = drain(&mut rx);
  let retries: Vec<u32> = events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::NodeRetrying { attempt, alert, .. } => {
        assert!(!alert);
        Some(*attempt)
      }
      _ => None,
    })
    .collect();
  assert_eq!(retries, vec![1, 2]);
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::NodeSkipped { node_id, cause, .. } if node_id == "end" && cause == "stage"
  )));
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
  let warehouse = MemoryWarehouse::new()
    .with_table("staging_events")
    .fail_matching_times("COPY", WarehouseError::connection("timeout"), 2);
  let (executor, mut rx) = observed(
    &warehouse,
    ExecutorConfig {
      alert_on_retry: true,
      ..ExecutorConfig::default()
    },
  );
  let graph = build(
    vec![NodeSpec::new(
      "stage",
      stage("staging_events"),
      RetryPolicy::new(3, Duration::from_millis(1)),
    )],
    &[],
  );

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Succeeded);
  assert_eq!(report.node("stage").unwrap().attempts, 3);
  assert!(drain(&mut rx).iter().any(|e| matches!(
    e,
    ExecutionEvent::NodeRetrying { alert: true, .. }
  )));
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
  let warehouse = MemoryWarehouse::new();
  let executor = Executor::new(Arc::new(warehouse.clone()), ExecutorConfig::default());
  let graph = build(
    vec![NodeSpec::new(
      "stage",
      stage("staging_events"),
      RetryPolicy::new(5, Duration::from_millis(1)),
    )],
    &[],
  );

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  let stage = report.node("stage").unwrap();
  assert_eq!(stage.attempts, 1);
  assert_eq!(stage.table(), Some("staging_events"));
  assert_eq!(warehouse.count_matching("COPY"), 1);
}

/// start → bad → end, start → slow → after → end
fn branching_graph() -> TaskGraph {
  build(
    vec![
      node("start", OperatorDef::NoOp),
      node("bad", fact("missing_table")),
      node("slow", dim("users", true)),
      node("after", dim("songs", false)),
      node("end", OperatorDef::NoOp),
    ],
    &[
      ("start", "bad"),
      ("start", "slow"),
      ("slow", "after"),
      ("bad", "end"),
      ("after", "end"),
    ],
  )
}

fn branching_warehouse() -> MemoryWarehouse {
  // `bad` fails after one statement, `slow` needs two.
  MemoryWarehouse::new()
    .with_table("users")
    .with_table("songs")
    .with_latency(Duration::from_millis(50))
}

#[tokio::test]
async fn test_fail_isolated_lets_independent_branch_finish() {
  let warehouse = branching_warehouse();
  let executor = Executor::new(
    Arc::new(warehouse.clone()),
    config(4, FailurePolicy::FailIsolated),
  );

  let report = executor
    .run(&branching_graph(), &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  assert_eq!(report.state("bad"), Some(NodeState::Failed));
  assert_eq!(report.state("slow"), Some(NodeState::Succeeded));
  assert_eq!(report.state("after"), Some(NodeState::Succeeded));
  assert_eq!(report.state("end"), Some(NodeState::Skipped));
  assert_eq!(
    report.node("bad").unwrap().error,
    Some(OperatorError::TableNotFound {
      table: "missing_table".to_string()
    })
  );
}

#[tokio::test]
async fn test_fail_fast_stops_dispatch() {
  let warehouse = branching_warehouse();
  let (executor, mut rx) = observed(&warehouse, config(4, FailurePolicy::FailFast));

  let report = executor
    .run(&branching_graph(), &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  assert_eq!(report.state("bad"), Some(NodeState::Failed));
  // Already running when the failure landed, so it finishes.
  assert_eq!(report.state("slow"), Some(NodeState::Succeeded));
  assert_eq!(report.state("after"), Some(NodeState::Skipped));
  assert_eq!(report.state("end"), Some(NodeState::Skipped));
  assert_eq!(warehouse.count_matching("INSERT INTO songs"), 0);

  assert!(drain(&mut rx).iter().any(|e| matches!(
    e,
    ExecutionEvent::NodeSkipped { node_id, cause, .. } if node_id == "after" && cause == "fail_fast"
  )));
}

#[tokio::test]
async fn test_resume_skips_succeeded_nodes() {
  let warehouse = MemoryWarehouse::new()
    .with_table("staging_events")
    .with_table("songplays")
    .fail_matching_times("INSERT INTO songplays", WarehouseError::sql("disk full"), 1);
  let executor = Executor::new(Arc::new(warehouse.clone()), ExecutorConfig::default());
  let graph = build(
    vec![
      node("start", OperatorDef::NoOp),
      node("stage", stage("staging_events")),
      node("fact", fact("songplays")),
      node("end", OperatorDef::NoOp),
    ],
    &[("start", "stage"), ("stage", "fact"), ("fact", "end")],
  );

  let first = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(first.status, RunStatus::Failed);
  assert_eq!(first.state("fact"), Some(NodeState::Failed));
  assert_eq!(first.state("end"), Some(NodeState::Skipped));

  let snapshot = first.states();
  let second = executor
    .run(&graph, &ctx(), Some(&snapshot), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(second.status, RunStatus::Succeeded);
  assert_eq!(second.node("stage").unwrap().attempts, 0);
  assert_eq!(second.node("fact").unwrap().attempts, 1);
  assert_eq!(warehouse.count_matching("COPY"), 1);
  assert_eq!(warehouse.count_matching("INSERT INTO songplays"), 2);
}

#[tokio::test]
async fn test_resume_rejects_unknown_node() {
  let executor = Executor::new(Arc::new(MemoryWarehouse::new()), ExecutorConfig::default());
  let graph = build(vec![node("start", OperatorDef::NoOp)], &[]);
  let snapshot = HashMap::from([("gone".to_string(), NodeState::Succeeded)]);

  let err = executor
    .run(&graph, &ctx(), Some(&snapshot), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::UnknownNode { .. }));
}

#[tokio::test]
async fn test_cancel_before_start_dispatches_nothing() {
  let warehouse = healthy_warehouse();
  let executor = Executor::new(Arc::new(warehouse.clone()), ExecutorConfig::default());
  let cancel = CancellationToken::new();
  cancel.cancel();

  let report = executor
    .run(&warehouse_graph(), &ctx(), None, cancel)
    .await
    .unwrap();

  assert_eq!(report.status, RunStatus::Cancelled);
  assert!(report.nodes.iter().all(|n| n.state == NodeState::Skipped));
  assert!(warehouse.statements().is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_retry_sleep() {
  let warehouse = MemoryWarehouse::new()
    .with_table("staging_events")
    .fail_matching("COPY", WarehouseError::connection("connection refused"));
  let (executor, mut rx) = observed(&warehouse, ExecutorConfig::default());
  let graph = build(
    vec![
      NodeSpec::new(
        "stage",
        stage("staging_events"),
        RetryPolicy::new(5, Duration::from_secs(300)),
      ),
      node("end", OperatorDef::NoOp),
    ],
    &[("stage", "end")],
  );
  let cancel = CancellationToken::new();

  let run = {
    let cancel = cancel.clone();
    async move { executor.run(&graph, &ctx(), None, cancel).await }
  };
  let handle = tokio::spawn(run);

  // Wait until the node is sleeping before its second attempt.
  loop {
    match rx.recv().await {
      Some(ExecutionEvent::NodeRetrying { .. }) => break,
      Some(_) => continue,
      None => panic!("executor finished without retrying"),
    }
  }
  cancel.cancel();

  let report = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("cancellation did not interrupt the retry delay")
    .unwrap()
    .unwrap();

  assert_eq!(report.status, RunStatus::Failed);
  assert_eq!(report.node("stage").unwrap().attempts, 1);
  assert_eq!(report.state("end"), Some(NodeState::Skipped));
  assert_eq!(warehouse.count_matching("COPY"), 1);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
  let warehouse = MemoryWarehouse::new()
    .with_table("a")
    .with_table("b")
    .with_table("c")
    .with_table("d")
    .with_latency(Duration::from_millis(10));
  let (executor, mut rx) = observed(&warehouse, config(2, FailurePolicy::FailIsolated));
  let graph = build(
    vec![
      node("start", OperatorDef::NoOp),
      node("load_a", dim("a", false)),
      node("load_b", dim("b", false)),
      node("load_c", dim("c", false)),
      node("load_d", dim("d", false)),
    ],
    &[
      ("start", "load_a"),
      ("start", "load_b"),
      ("start", "load_c"),
      ("start", "load_d"),
    ],
  );

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(report.status, RunStatus::Succeeded);

  let mut running: i32 = 0;
  let mut peak = 0;
  for event in drain(&mut rx) {
    match event {
      ExecutionEvent::NodeStarted { .. } => running += 1,
      ExecutionEvent::NodeSucceeded { .. } | ExecutionEvent::NodeFailed { .. } => running -= 1,
      _ => {}
    }
    peak = peak.max(running);
  }
  assert!(peak <= 2, "peak concurrency was {}", peak);
  assert_eq!(warehouse.acquired_total(), 4);
  assert_eq!(warehouse.active_connections(), 0);
}

struct PanickingWarehouse;

#[async_trait]
impl Warehouse for PanickingWarehouse {
  async fn acquire(&self) -> Result<Box<dyn Connection>, WarehouseError> {
    panic!("connection pool poisoned")
  }
}

#[tokio::test]
async fn test_panicking_operator_fails_node() {
  let executor = Executor::new(Arc::new(PanickingWarehouse), ExecutorConfig::default());
  let graph = build(
    vec![
      node("start", OperatorDef::NoOp),
      NodeSpec::new(
        "stage",
        stage("staging_events"),
        RetryPolicy::new(3, Duration::from_millis(1)),
      ),
      node("end", OperatorDef::NoOp),
    ],
    &[("start", "stage"), ("stage", "end")],
  );

  let report = executor
    .run(&graph, &ctx(), None, CancellationToken::new())
    .await
    .unwrap();

  let stage = report.node("stage").unwrap();
  assert_eq!(stage.state, NodeState::Failed);
  assert_eq!(stage.attempts, 1);
  assert!(matches!(
    &stage.error,
    Some(OperatorError::Panicked { message }) if message.contains("poisoned")
  ));
  assert_eq!(report.state("start"), Some(NodeState::Succeeded));
  assert_eq!(report.state("end"), Some(NodeState::Skipped));
}

#[tokio::test]
async fn test_cyclic_pipeline_never_runs() {
  let pipeline: PipelineDef = serde_json::from_value(json!({
    "name": "cyclic",
    "nodes": [
      { "node_id": "stage", "type": "stage_load", "source_location_template": "s3://b/k",
        "destination_table": "staging_events", "credentials_id": "aws_credentials" },
      { "node_id": "fact", "type": "fact_load", "insert_select": "SELECT 1",
        "target_table": "songplays" }
    ],
    "edges": [
      { "from": "stage", "to": "fact" },
      { "from": "fact", "to": "stage" }
    ]
  }))
  .unwrap();
  let warehouse = MemoryWarehouse::new()
    .with_table("staging_events")
    .with_table("songplays");
  let runner = PipelineRunner::new(
    pipeline,
    Arc::new(warehouse.clone()),
    Arc::new(StaticCredentialProvider::new()),
    ExecutorConfig::default(),
  );

  let err = runner
    .execute_once(
      RunRequest::new(Utc.with_ymd_and_hms(2019, 1, 12, 0, 0, 0).unwrap()),
      CancellationToken::new(),
    )
    .await
    .unwrap_err();

  assert!(matches!(err, RunnerError::Graph(GraphError::Cycle { .. })));
  assert!(warehouse.statements().is_empty());
  assert_eq!(warehouse.acquired_total(), 0);
}

#[tokio::test]
async fn test_runner_resolves_pipeline_params() {
  let pipeline: PipelineDef = serde_json::from_value(json!({
    "name": "params",
    "defaults": { "retries": 0 },
    "params": { "bucket": "udacity-dend", "prefix": "log_data" },
    "nodes": [
      { "node_id": "stage", "type": "stage_load",
        "source_location_template": "s3://{{ params.bucket }}/{{ params.prefix }}/{{ ds_nodash }}",
        "destination_table": "staging_events", "credentials_id": "aws_credentials" }
    ]
  }))
  .unwrap();
  let warehouse = MemoryWarehouse::new().with_table("staging_events");
  let credentials =
    StaticCredentialProvider::new().with("aws_credentials", Credentials::new("KEY", "SECRET"));
  let runner = PipelineRunner::new(
    pipeline,
    Arc::new(warehouse.clone()),
    Arc::new(credentials),
    ExecutorConfig::default(),
  );

  let request = RunRequest::new(Utc.with_ymd_and_hms(2019, 1, 12, 5, 0, 0).unwrap())
    .with_param("prefix", "song_data");
  let report = runner
    .execute_once(request, CancellationToken::new())
    .await
    .unwrap();

  assert!(report.is_success());
  assert!(warehouse.statements()[0].contains("FROM 's3://udacity-dend/song_data/20190112'"));
}
