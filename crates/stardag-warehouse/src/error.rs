use thiserror::Error;

/// Errors reported by a warehouse connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WarehouseError {
  /// Transient I/O or pool failure; the same statement may succeed later.
  #[error("connection error: {message}")]
  Connection { message: String },

  /// The statement referenced a table that does not exist.
  #[error("undefined table: {message}")]
  UndefinedTable { message: String },

  /// The statement referenced a column that does not exist.
  #[error("undefined column: {message}")]
  UndefinedColumn { message: String },

  /// Any other rejected statement.
  #[error("sql error: {message}")]
  Sql { message: String },
}

impl WarehouseError {
  pub fn connection(message: impl Into<String>) -> Self {
    Self::Connection {
      message: message.into(),
    }
  }

  pub fn sql(message: impl Into<String>) -> Self {
    Self::Sql {
      message: message.into(),
    }
  }

  /// Whether retrying the same statement could succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Connection { .. })
  }
}
