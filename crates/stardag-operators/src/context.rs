//! Per-run execution context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use stardag_warehouse::CredentialProvider;

/// Values fixed for the lifetime of one run.
///
/// Built once when the run starts and shared read-only by every operator.
/// Cloning is cheap; there are no setters, only consuming builder methods.
#[derive(Clone)]
pub struct ExecutionContext {
  run_id: String,
  logical_date: DateTime<Utc>,
  partition_key: String,
  params: BTreeMap<String, String>,
  credentials: Arc<dyn CredentialProvider>,
}

impl ExecutionContext {
  /// Create a context for the run covering `logical_date`.
  ///
  /// The partition key defaults to the logical date as `YYYY-MM-DD`.
  pub fn new(logical_date: DateTime<Utc>, credentials: Arc<dyn CredentialProvider>) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      logical_date,
      partition_key: logical_date.format("%Y-%m-%d").to_string(),
      params: BTreeMap::new(),
      credentials,
    }
  }

  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = run_id.into();
    self
  }

  pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
    self.partition_key = partition_key.into();
    self
  }

  pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
    self.params.extend(params);
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn logical_date(&self) -> DateTime<Utc> {
    self.logical_date
  }

  pub fn partition_key(&self) -> &str {
    &self.partition_key
  }

  pub fn params(&self) -> &BTreeMap<String, String> {
    &self.params
  }

  pub fn credentials(&self) -> &dyn CredentialProvider {
    self.credentials.as_ref()
  }

  /// Variables visible to source location templates.
  pub fn template_vars(&self) -> serde_json::Value {
    let date = self.logical_date;
    json!({
      "ds": date.format("%Y-%m-%d").to_string(),
      "ds_nodash": date.format("%Y%m%d").to_string(),
      "ts": date.to_rfc3339(),
      "ts_nodash": date.format("%Y%m%dT%H%M%S").to_string(),
      "year": date.format("%Y").to_string(),
      "month": date.format("%m").to_string(),
      "day": date.format("%d").to_string(),
      "hour": date.format("%H").to_string(),
      "partition_key": self.partition_key,
      "run_id": self.run_id,
      "params": self.params,
    })
  }
}

impl fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionContext")
      .field("run_id", &self.run_id)
      .field("logical_date", &self.logical_date)
      .field("partition_key", &self.partition_key)
      .field("params", &self.params)
      .finish_non_exhaustive()
  }
}
