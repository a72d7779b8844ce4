//! Stardag Operators
//!
//! Every node of a task graph runs one operator. An operator is a stateless
//! function of its configuration, the run's [`ExecutionContext`] and a
//! [`Warehouse`]; it returns an [`OperatorResult`] instead of raising, so the
//! executor can treat every outcome as a value.
//!
//! | Variant | Statements |
//! |---|---|
//! | stage load | optional `DELETE FROM`, then `COPY ... FROM '<source>'` |
//! | fact load | `INSERT INTO <table> (<select>)`, append only |
//! | dimension load | optional `DELETE FROM`, then `INSERT INTO <table> (<select>)` |
//! | quality check | `SELECT COUNT(*)`, then one null count per column, per table |
//! | no-op | none |
//!
//! Operators acquire a connection inside `run` and drop it before returning.

mod context;
mod load;
mod quality;
mod result;
mod stage;
mod template;

use async_trait::async_trait;
use stardag_config::OperatorDef;
use stardag_warehouse::Warehouse;

pub use context::ExecutionContext;
pub use load::{delete_statement, insert_statement};
pub use quality::{null_count_query, row_count_query};
pub use result::{ErrorCategory, Metrics, OperatorError, OperatorResult, OperatorStatus};
pub use stage::copy_statement;
pub use template::{TemplateError, resolve};

/// A unit of work run by the executor.
#[async_trait]
pub trait Operator: Send + Sync {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult;
}

#[async_trait]
impl Operator for OperatorDef {
  async fn run(&self, ctx: &ExecutionContext, warehouse: &dyn Warehouse) -> OperatorResult {
    match self {
      OperatorDef::StageLoad(def) => def.run(ctx, warehouse).await,
      OperatorDef::FactLoad(def) => def.run(ctx, warehouse).await,
      OperatorDef::DimensionLoad(def) => def.run(ctx, warehouse).await,
      OperatorDef::QualityCheck(def) => def.run(ctx, warehouse).await,
      OperatorDef::NoOp => OperatorResult::success(),
    }
  }
}
