//! Stardag Warehouse
//!
//! This crate provides the seams to the systems a load pipeline talks to:
//!
//! - [`Warehouse`]: a pool handing out [`Connection`]s. A connection is released
//!   when it is dropped, so holding it in a local binding scopes it to a single
//!   operator invocation on every exit path.
//! - [`Connection`]: runs a statement or fetches rows.
//! - [`CredentialProvider`]: resolves an opaque credentials id for object store
//!   access.
//!
//! Implementations:
//! - [`MemoryWarehouse`]: a scripted in-memory warehouse that records every
//!   statement, used in tests.
//! - `PgWarehouse` (feature `postgres`): Postgres/Redshift over sqlx.
//!
//! Statements can carry object store secrets, so connections only log them
//! through [`redact`].

mod credentials;
mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod redact;

use async_trait::async_trait;

pub use credentials::{
  CredentialError, CredentialProvider, Credentials, EnvCredentialProvider,
  StaticCredentialProvider,
};
pub use error::WarehouseError;
pub use memory::MemoryWarehouse;
#[cfg(feature = "postgres")]
pub use postgres::PgWarehouse;
pub use redact::redact;

/// A fetched row; values are decoded to JSON.
pub type Row = Vec<serde_json::Value>;

/// A single warehouse connection.
#[async_trait]
pub trait Connection: Send {
  /// Run a statement, returning the number of rows it affected.
  async fn execute(&mut self, statement: &str) -> Result<u64, WarehouseError>;

  /// Run a query and return all of its rows.
  async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>, WarehouseError>;
}

/// A pool of warehouse connections.
#[async_trait]
pub trait Warehouse: Send + Sync {
  /// Take a connection from the pool. Dropping it gives it back.
  async fn acquire(&self) -> Result<Box<dyn Connection>, WarehouseError>;
}
