//! Postgres/Redshift warehouse over a sqlx connection pool.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions as _, Postgres, Row as _};
use tracing::debug;

use crate::error::WarehouseError;
use crate::redact::redact;
use crate::{Connection, Row, Warehouse};

const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_COLUMN: &str = "42703";

/// A pooled Postgres-protocol warehouse.
#[derive(Debug, Clone)]
pub struct PgWarehouse {
  pool: PgPool,
}

impl PgWarehouse {
  /// Create a warehouse around an existing pool.
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Open a lazily-connecting pool against `url`.
  ///
  /// sqlx's own statement logging is turned off: COPY statements carry object
  /// store secrets, and connections log a redacted form instead.
  pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, WarehouseError> {
    let options = url
      .parse::<PgConnectOptions>()
      .map_err(classify)?
      .disable_statement_logging();
    let pool = PgPoolOptions::new()
      .max_connections(max_connections)
      .connect_lazy_with(options);
    Ok(Self::new(pool))
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

#[async_trait]
impl Warehouse for PgWarehouse {
  async fn acquire(&self) -> Result<Box<dyn Connection>, WarehouseError> {
    let conn = self.pool.acquire().await.map_err(classify)?;
    Ok(Box::new(PooledConnection { conn }))
  }
}

/// A connection checked out of the pool; returned to it on drop.
struct PooledConnection {
  conn: PoolConnection<Postgres>,
}

// The executor is bound to a concrete `&mut PgConnection` before the call; going
// through `raw_sql(..).execute(&mut *conn)` leaves a higher-ranked `Executor`
// bound that the boxed `async_trait` future cannot satisfy.
#[async_trait]
impl Connection for PooledConnection {
  async fn execute(&mut self, statement: &str) -> Result<u64, WarehouseError> {
    debug!(statement = %redact(statement), "executing statement");
    let conn: &mut sqlx::PgConnection = &mut self.conn;
    // Simple query protocol: COPY is not allowed as a prepared statement on Redshift.
    let result = sqlx::Executor::execute(conn, sqlx::raw_sql(statement))
      .await
      .map_err(classify)?;
    Ok(result.rows_affected())
  }

  async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>, WarehouseError> {
    debug!(query = %redact(query), "fetching rows");
    let conn: &mut sqlx::PgConnection = &mut self.conn;
    let rows = sqlx::Executor::fetch_all(conn, sqlx::raw_sql(query))
      .await
      .map_err(classify)?;
    Ok(rows.iter().map(decode_row).collect())
  }
}

/// Decode each column into the first JSON type it fits.
fn decode_row(row: &PgRow) -> Row {
  (0..row.len())
    .map(|i| {
      if let Ok(value) = row.try_get::<Option<i64>, _>(i) {
        return value.map(serde_json::Value::from).unwrap_or_default();
      }
      if let Ok(value) = row.try_get::<Option<i32>, _>(i) {
        return value.map(serde_json::Value::from).unwrap_or_default();
      }
      if let Ok(value) = row.try_get::<Option<bool>, _>(i) {
        return value.map(serde_json::Value::from).unwrap_or_default();
      }
      if let Ok(value) = row.try_get::<Option<f64>, _>(i) {
        return value.map(serde_json::Value::from).unwrap_or_default();
      }
      if let Ok(value) = row.try_get::<Option<String>, _>(i) {
        return value.map(serde_json::Value::from).unwrap_or_default();
      }
      serde_json::Value::Null
    })
    .collect()
}

/// Map a sqlx error onto the transient/fatal split operators rely on.
fn classify(err: sqlx::Error) -> WarehouseError {
  match err {
    sqlx::Error::Database(db) => {
      let message = db.message().to_string();
      match db.code().as_deref() {
        Some(UNDEFINED_TABLE) => WarehouseError::UndefinedTable { message },
        Some(UNDEFINED_COLUMN) => WarehouseError::UndefinedColumn { message },
        _ => WarehouseError::Sql { message },
      }
    }
    sqlx::Error::Io(_)
    | sqlx::Error::Tls(_)
    | sqlx::Error::Protocol(_)
    | sqlx::Error::PoolTimedOut
    | sqlx::Error::PoolClosed
    | sqlx::Error::WorkerCrashed => WarehouseError::Connection {
      message: err.to_string(),
    },
    other => WarehouseError::Sql {
      message: other.to_string(),
    },
  }
}

#[cfg(test)]
mod tests {
  use std::io;

  use super::*;

  #[test]
  fn test_sqlstate_codes() {
    assert_eq!(UNDEFINED_TABLE, "42P01");
    assert_eq!(UNDEFINED_COLUMN, "42703");
  }

  #[test]
  fn test_transport_errors_are_transient() {
    let errors = [
      sqlx::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
      sqlx::Error::Protocol("unexpected message".to_string()),
      sqlx::Error::PoolTimedOut,
      sqlx::Error::PoolClosed,
      sqlx::Error::WorkerCrashed,
    ];

    for err in errors {
      let classified = classify(err);
      assert!(
        matches!(classified, WarehouseError::Connection { .. }),
        "{classified:?}"
      );
      assert!(classified.is_transient());
    }
  }

  #[test]
  fn test_other_errors_are_fatal() {
    let classified = classify(sqlx::Error::RowNotFound);

    assert!(matches!(classified, WarehouseError::Sql { .. }));
    assert!(!classified.is_transient());
  }

  #[test]
  fn test_connect_lazy_rejects_malformed_url() {
    let err = PgWarehouse::connect_lazy("not a url", 1).unwrap_err();
    assert!(matches!(err, WarehouseError::Sql { .. }));
  }

  #[tokio::test]
  async fn test_connect_lazy_does_not_dial() {
    let warehouse = PgWarehouse::connect_lazy("postgres://stardag@127.0.0.1:1/dev", 2).unwrap();
    assert_eq!(warehouse.pool().size(), 0);
  }
}
