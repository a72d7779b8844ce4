//! Quality gate: certifies loaded tables are non-empty and free of nulls in
//! the columns that matter.

use async_trait::async_trait;
use stardag_config::QualityCheckDef;
use stardag_warehouse::{Connection, Row, Warehouse};
use tracing::info;

use crate::context::ExecutionContext;
use crate::result::{Metrics, OperatorError, OperatorResult};
use crate::Operator;

pub fn row_count_query(table: &str) -> String {
  format!("SELECT COUNT(*) FROM {}", table)
}

/// Rows minus non-null values: zero when the column has no nulls.
pub fn null_count_query(table: &str, column: &str) -> String {
  format!("SELECT COUNT(*) - COUNT({}) FROM {}", column, table)
}

#[async_trait]
impl Operator for QualityCheckDef {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult {
    info!(run_id = %ctx.run_id(), tables = self.tables.len(), "checking tables for correct data");
    check(self, warehouse).await.into()
  }
}

async fn check(def: &QualityCheckDef, warehouse: &dyn Warehouse) -> Result<Metrics, OperatorError> {
  let mut conn = warehouse.acquire().await.map_err(|e| {
    let first = def.tables.keys().next().map(String::as_str).unwrap_or_default();
    OperatorError::from_warehouse(e, first, None)
  })?;
  let mut metrics = Metrics::new();

  // The row count comes first: null checks on an empty table prove nothing.
  for (table, columns) in &def.tables {
    let rows = count_rows(conn.as_mut(), table).await?;
    info!(table = %table, rows, "row count check passed");
    metrics.insert(format!("rows.{}", table), rows);

    for column in columns.columns() {
      check_nulls(conn.as_mut(), table, column).await?;
      info!(table = %table, column = %column, "null check passed");
    }
  }

  Ok(metrics)
}

async fn count_rows(conn: &mut dyn Connection, table: &str) -> Result<u64, OperatorError> {
  let rows = conn
    .fetch_rows(&row_count_query(table))
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, None))?;

  match scalar(&rows) {
    None => Err(OperatorError::NoCountResult {
      table: table.to_string(),
    }),
    Some(count) if count < 1 => Err(OperatorError::EmptyTable {
      table: table.to_string(),
    }),
    Some(count) => Ok(count as u64),
  }
}

async fn check_nulls(conn: &mut dyn Connection, table: &str, column: &str) -> Result<(), OperatorError> {
  let rows = conn
    .fetch_rows(&null_count_query(table, column))
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, Some(column)))?;

  match scalar(&rows) {
    None => Err(OperatorError::NoNullCountResult {
      table: table.to_string(),
      column: column.to_string(),
    }),
    Some(nulls) if nulls > 0 => Err(OperatorError::NullValues {
      table: table.to_string(),
      column: column.to_string(),
      nulls: nulls as u64,
    }),
    Some(_) => Ok(()),
  }
}

/// First column of the first row as an integer.
fn scalar(rows: &[Row]) -> Option<i64> {
  let value = rows.first()?.first()?;
  value
    .as_i64()
    .or_else(|| value.as_u64().and_then(|v| i64::try_from(v).ok()))
    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
