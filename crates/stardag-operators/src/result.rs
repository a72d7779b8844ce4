//! Operator outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stardag_warehouse::{CredentialError, WarehouseError};
use thiserror::Error;

use crate::template::TemplateError;

/// Numeric metrics reported by an operator, e.g. `rows_loaded`.
pub type Metrics = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
  Success,
  RetryableFailure,
  FatalFailure,
}

/// Broad class of an operator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
  /// Bad node configuration: template, credentials.
  Config,
  /// Transient I/O against the warehouse or object store.
  Connection,
  /// Empty table, nulls, missing table or column.
  FatalData,
  /// The warehouse rejected a statement.
  SqlExecution,
  /// The operator itself broke.
  Internal,
}

/// Why an operator invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorError {
  #[error("connection error: {message}")]
  Connection { message: String },

  #[error("table '{table}' does not exist")]
  TableNotFound { table: String },

  #[error("data quality check failed: {table} returned no results")]
  NoCountResult { table: String },

  #[error("data quality check failed: null count of '{column}' in {table} returned no results")]
  NoNullCountResult { table: String, column: String },

  #[error("data quality check failed: {table} contained 0 rows")]
  EmptyTable { table: String },

  #[error("data quality check failed: column '{column}' in table '{table}' has {nulls} missing values")]
  NullValues {
    table: String,
    column: String,
    nulls: u64,
  },

  #[error("column '{column}' does not exist in table '{table}'")]
  MissingColumn { table: String, column: String },

  #[error("statement against '{table}' failed: {message}")]
  Sql { table: String, message: String },

  #[error("failed to resolve template '{template}': {message}")]
  Template { template: String, message: String },

  #[error("failed to resolve credentials: {message}")]
  Credentials { message: String },

  #[error("operator panicked: {message}")]
  Panicked { message: String },
}

impl OperatorError {
  /// Classify a warehouse error raised while working on `table`.
  pub(crate) fn from_warehouse(err: WarehouseError, table: &str, column: Option<&str>) -> Self {
    match err {
      WarehouseError::Connection { message } => OperatorError::Connection { message },
      WarehouseError::UndefinedTable { .. } => OperatorError::TableNotFound {
        table: table.to_string(),
      },
      WarehouseError::UndefinedColumn { message } => match column {
        Some(column) => OperatorError::MissingColumn {
          table: table.to_string(),
          column: column.to_string(),
        },
        None => OperatorError::Sql {
          table: table.to_string(),
          message,
        },
      },
      WarehouseError::Sql { message } => OperatorError::Sql {
        table: table.to_string(),
        message,
      },
    }
  }

  pub fn category(&self) -> ErrorCategory {
    match self {
      OperatorError::Connection { .. } => ErrorCategory::Connection,
      OperatorError::TableNotFound { .. }
      | OperatorError::NoCountResult { .. }
      | OperatorError::NoNullCountResult { .. }
      | OperatorError::EmptyTable { .. }
      | OperatorError::NullValues { .. }
      | OperatorError::MissingColumn { .. } => ErrorCategory::FatalData,
      OperatorError::Sql { .. } => ErrorCategory::SqlExecution,
      OperatorError::Template { .. } | OperatorError::Credentials { .. } => ErrorCategory::Config,
      OperatorError::Panicked { .. } => ErrorCategory::Internal,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.category() == ErrorCategory::Connection
  }

  /// The table implicated by this failure, if any.
  pub fn table(&self) -> Option<&str> {
    match self {
      OperatorError::TableNotFound { table }
      | OperatorError::NoCountResult { table }
      | OperatorError::NoNullCountResult { table, .. }
      | OperatorError::EmptyTable { table }
      | OperatorError::NullValues { table, .. }
      | OperatorError::MissingColumn { table, .. }
      | OperatorError::Sql { table, .. } => Some(table),
      OperatorError::Connection { .. }
      | OperatorError::Template { .. }
      | OperatorError::Credentials { .. }
      | OperatorError::Panicked { .. } => None,
    }
  }

  /// The column implicated by this failure, if any.
  pub fn column(&self) -> Option<&str> {
    match self {
      OperatorError::NullValues { column, .. }
      | OperatorError::NoNullCountResult { column, .. }
      | OperatorError::MissingColumn { column, .. } => Some(column),
      _ => None,
    }
  }
}

impl From<TemplateError> for OperatorError {
  fn from(err: TemplateError) -> Self {
    OperatorError::Template {
      template: err.template,
      message: err.message,
    }
  }
}

impl From<CredentialError> for OperatorError {
  fn from(err: CredentialError) -> Self {
    OperatorError::Credentials {
      message: err.to_string(),
    }
  }
}

/// The outcome of one operator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorResult {
  pub status: OperatorStatus,
  #[serde(default)]
  pub metrics: Metrics,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<OperatorError>,
}

impl OperatorResult {
  pub fn success() -> Self {
    Self::with_metrics(Metrics::new())
  }

  pub fn with_metrics(metrics: Metrics) -> Self {
    Self {
      status: OperatorStatus::Success,
      metrics,
      error: None,
    }
  }

  /// A failed result; retryable or fatal depending on the error.
  pub fn failed(error: OperatorError) -> Self {
    let status = if error.is_retryable() {
      OperatorStatus::RetryableFailure
    } else {
      OperatorStatus::FatalFailure
    };
    Self {
      status,
      metrics: Metrics::new(),
      error: Some(error),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == OperatorStatus::Success
  }
}

impl From<Result<Metrics, OperatorError>> for OperatorResult {
  fn from(result: Result<Metrics, OperatorError>) -> Self {
    match result {
      Ok(metrics) => OperatorResult::with_metrics(metrics),
      Err(err) => OperatorResult::failed(err),
    }
  }
}
