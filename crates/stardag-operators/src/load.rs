//! Fact and dimension loads: insert-select from staging tables.
//!
//! The insert-select is a template resolved against the run context, so a
//! load can be scoped to the run's partition, e.g.
//! `SELECT ... WHERE start_time >= '{{ ds }}'`.

use async_trait::async_trait;
use stardag_config::{DimensionLoadDef, FactLoadDef};
use stardag_warehouse::Warehouse;
use tracing::info;

use crate::context::ExecutionContext;
use crate::result::{Metrics, OperatorError, OperatorResult};
use crate::template::resolve;
use crate::Operator;

pub fn delete_statement(table: &str) -> String {
  format!("DELETE FROM {}", table)
}

pub fn insert_statement(table: &str, insert_select: &str) -> String {
  format!("INSERT INTO {} ({})", table, insert_select)
}

// Fact loads have no overwrite switch: a rerun of the same partition appends
// its rows a second time.
#[async_trait]
impl Operator for FactLoadDef {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult {
    info!(run_id = %ctx.run_id(), table = %self.target_table, "loading fact table");
    load(&self.target_table, &self.insert_select, false, ctx, warehouse)
      .await
      .into()
  }
}

#[async_trait]
impl Operator for DimensionLoadDef {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult {
    info!(
      run_id = %ctx.run_id(),
      table = %self.target_table,
      overwrite = self.overwrite,
      "loading dimension table"
    );
    load(
      &self.target_table,
      &self.insert_select,
      self.overwrite,
      ctx,
      warehouse,
    )
    .await
    .into()
  }
}

async fn load(
  table: &str,
  insert_select: &str,
  overwrite: bool,
  ctx: &ExecutionContext,
  warehouse: &dyn Warehouse,
) -> Result<Metrics, OperatorError> {
  let insert_select = resolve(insert_select, ctx)?;
  let mut conn = warehouse
    .acquire()
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
  let mut metrics = Metrics::new();

  if overwrite {
    info!(table, "clearing data from target table");
    let deleted = conn
      .execute(&delete_statement(table))
      .await
      .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
    metrics.insert("rows_deleted".to_string(), deleted);
  }

  let loaded = conn
    .execute(&insert_statement(table, &insert_select))
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
  metrics.insert("rows_loaded".to_string(), loaded);

  Ok(metrics)
}
