//! Staging loads: object storage to staging table.

use async_trait::async_trait;
use stardag_config::{FormatHint, StageLoadDef};
use stardag_warehouse::{Credentials, Warehouse};
use tracing::info;

use crate::context::ExecutionContext;
use crate::load::delete_statement;
use crate::result::{Metrics, OperatorError, OperatorResult};
use crate::template::resolve;
use crate::Operator;

/// Build the bulk copy statement for a resolved source location.
pub fn copy_statement(def: &StageLoadDef, source: &str, credentials: &Credentials) -> String {
  let mut sql = format!(
    "COPY {} FROM '{}' ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}'",
    def.destination_table, source, credentials.access_key_id, credentials.secret_access_key
  );
  if let Some(token) = &credentials.session_token {
    sql.push_str(&format!(" SESSION_TOKEN '{}'", token));
  }
  match &def.format {
    FormatHint::Json { paths } => sql.push_str(&format!(" FORMAT AS JSON '{}'", paths)),
    FormatHint::Csv { ignore_header_rows } => {
      sql.push_str(" FORMAT AS CSV");
      if *ignore_header_rows > 0 {
        sql.push_str(&format!(" IGNOREHEADER {}", ignore_header_rows));
      }
    }
  }
  if let Some(region) = &def.region {
    sql.push_str(&format!(" REGION '{}'", region));
  }
  sql
}

#[async_trait]
impl Operator for StageLoadDef {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult {
    stage(self, ctx, warehouse).await.into()
  }
}

async fn stage(
  def: &StageLoadDef,
  ctx: &ExecutionContext,
  warehouse: &dyn Warehouse,
) -> Result<Metrics, OperatorError> {
  let table = def.destination_table.as_str();
  let source = resolve(&def.source_location_template, ctx)?;
  let credentials = ctx.credentials().resolve(&def.credentials_id)?;

  let mut conn = warehouse
    .acquire()
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
  let mut metrics = Metrics::new();

  if def.overwrite {
    info!(run_id = %ctx.run_id(), table, "clearing data from destination table");
    let deleted = conn
      .execute(&delete_statement(table))
      .await
      .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
    metrics.insert("rows_deleted".to_string(), deleted);
  }

  info!(run_id = %ctx.run_id(), table, source = %source, "copying data into staging table");
  let loaded = conn
    .execute(&copy_statement(def, &source, &credentials))
    .await
    .map_err(|e| OperatorError::from_warehouse(e, table, None))?;
  metrics.insert("rows_loaded".to_string(), loaded);

  Ok(metrics)
}
