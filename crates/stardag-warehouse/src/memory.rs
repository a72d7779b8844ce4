//! In-memory warehouse.
//!
//! Nothing is stored: statements are checked against a set of registered
//! tables, recorded, and answered from scripted responses. Failures can be
//! injected per statement pattern or on acquisition, which makes retry and
//! failure propagation testable without a database.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::WarehouseError;
use crate::redact::redact;
use crate::{Connection, Row, Warehouse};

#[derive(Debug)]
struct InjectedFailure {
  pattern: String,
  error: WarehouseError,
  /// `None` fails forever.
  remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
  tables: BTreeSet<String>,
  rows_affected: HashMap<String, u64>,
  responses: HashMap<String, Vec<Row>>,
  failures: Vec<InjectedFailure>,
  acquire_failures: Vec<WarehouseError>,
  statements: Vec<String>,
  acquired_total: usize,
}

/// A scripted warehouse shared by every connection it hands out.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
  state: Arc<Mutex<State>>,
  active: Arc<AtomicUsize>,
  latency: Option<Duration>,
}

impl MemoryWarehouse {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a table so statements writing to it are accepted.
  pub fn with_table(self, table: &str) -> Self {
    self.lock().tables.insert(normalize(table));
    self
  }

  /// Register a table whose copy/insert statements report `rows` affected rows.
  pub fn with_table_rows(self, table: &str, rows: u64) -> Self {
    {
      let mut state = self.lock();
      state.tables.insert(normalize(table));
      state.rows_affected.insert(normalize(table), rows);
    }
    self
  }

  /// Answer `query` (matched exactly) with `rows`.
  pub fn respond(self, query: &str, rows: Vec<Row>) -> Self {
    self.lock().responses.insert(query.to_string(), rows);
    self
  }

  /// Every statement containing `pattern` fails with `error`.
  pub fn fail_matching(self, pattern: &str, error: WarehouseError) -> Self {
    self.push_failure(pattern, error, None)
  }

  /// The next `times` statements containing `pattern` fail with `error`.
  pub fn fail_matching_times(self, pattern: &str, error: WarehouseError, times: usize) -> Self {
    self.push_failure(pattern, error, Some(times))
  }

  /// The next `times` acquisitions fail with `error`.
  pub fn fail_acquire(self, error: WarehouseError, times: usize) -> Self {
    self
      .lock()
      .acquire_failures
      .extend(std::iter::repeat_n(error, times));
    self
  }

  /// Delay every statement, to make overlapping work observable.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Every statement and query received so far, in order.
  pub fn statements(&self) -> Vec<String> {
    self.lock().statements.clone()
  }

  /// Number of recorded statements containing `pattern`.
  pub fn count_matching(&self, pattern: &str) -> usize {
    self
      .lock()
      .statements
      .iter()
      .filter(|s| s.contains(pattern))
      .count()
  }

  /// Connections handed out and not yet dropped.
  pub fn active_connections(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }

  /// Successful acquisitions since creation.
  pub fn acquired_total(&self) -> usize {
    self.lock().acquired_total
  }

  fn push_failure(self, pattern: &str, error: WarehouseError, remaining: Option<usize>) -> Self {
    self.lock().failures.push(InjectedFailure {
      pattern: pattern.to_string(),
      error,
      remaining,
    });
    self
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
  async fn acquire(&self) -> Result<Box<dyn Connection>, WarehouseError> {
    {
      let mut state = self.lock();
      if !state.acquire_failures.is_empty() {
        return Err(state.acquire_failures.remove(0));
      }
      state.acquired_total += 1;
    }

    self.active.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(MemoryConnection {
      state: self.state.clone(),
      latency: self.latency,
      _lease: Lease {
        active: self.active.clone(),
      },
    }))
  }
}

/// Decrements the active-connection count when the connection is dropped.
#[derive(Debug)]
struct Lease {
  active: Arc<AtomicUsize>,
}

impl Drop for Lease {
  fn drop(&mut self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

#[derive(Debug)]
struct MemoryConnection {
  state: Arc<Mutex<State>>,
  latency: Option<Duration>,
  _lease: Lease,
}

impl MemoryConnection {
  fn lock(&self) -> MutexGuard<'_, State> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  async fn pause(&self) {
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
  }

  /// Record the statement and apply any injected failure matching it.
  fn record(&self, statement: &str) -> Result<(), WarehouseError> {
    let mut state = self.lock();
    state.statements.push(statement.to_string());

    let failure = state.failures.iter_mut().find(|f| {
      statement.contains(&f.pattern) && f.remaining.is_none_or(|remaining| remaining > 0)
    });

    if let Some(failure) = failure {
      if let Some(remaining) = failure.remaining.as_mut() {
        *remaining -= 1;
      }
      return Err(failure.error.clone());
    }

    Ok(())
  }

  fn check_table(&self, table: &str) -> Result<(), WarehouseError> {
    if self.lock().tables.contains(&normalize(table)) {
      Ok(())
    } else {
      Err(WarehouseError::UndefinedTable {
        message: format!("relation \"{}\" does not exist", table),
      })
    }
  }
}

#[async_trait]
impl Connection for MemoryConnection {
  async fn execute(&mut self, statement: &str) -> Result<u64, WarehouseError> {
    self.pause().await;
    self.record(statement)?;
    debug!(statement = %redact(statement), "memory warehouse execute");

    match write_target(statement) {
      Some(table) => {
        self.check_table(&table)?;
        if is_delete(statement) {
          return Ok(0);
        }
        Ok(
          self
            .lock()
            .rows_affected
            .get(&normalize(&table))
            .copied()
            .unwrap_or(0),
        )
      }
      None => Ok(0),
    }
  }

  async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>, WarehouseError> {
    self.pause().await;
    self.record(query)?;
    debug!(query = %redact(query), "memory warehouse fetch");

    if let Some(rows) = self.lock().responses.get(query) {
      return Ok(rows.clone());
    }
    if let Some(table) = read_source(query) {
      self.check_table(&table)?;
    }
    Ok(Vec::new())
  }
}

fn normalize(table: &str) -> String {
  table.trim().to_ascii_lowercase()
}

fn clean(token: &str) -> String {
  token
    .trim_matches(|c: char| c == '(' || c == ')' || c == ';' || c == ',')
    .to_string()
}

fn is_delete(statement: &str) -> bool {
  statement
    .split_whitespace()
    .next()
    .is_some_and(|t| t.eq_ignore_ascii_case("DELETE"))
}

/// The table a DELETE, COPY, INSERT or TRUNCATE statement writes to.
fn write_target(statement: &str) -> Option<String> {
  let tokens: Vec<&str> = statement.split_whitespace().collect();
  let keyword = |i: usize, word: &str| tokens.get(i).is_some_and(|t| t.eq_ignore_ascii_case(word));

  let table = if keyword(0, "DELETE") && keyword(1, "FROM") {
    tokens.get(2)
  } else if keyword(0, "INSERT") && keyword(1, "INTO") {
    tokens.get(2)
  } else if keyword(0, "COPY") || keyword(0, "TRUNCATE") {
    tokens.get(1)
  } else {
    None
  };

  table.map(|t| clean(t)).filter(|t| !t.is_empty())
}

/// The first table a query reads from.
fn read_source(query: &str) -> Option<String> {
  let tokens: Vec<&str> = query.split_whitespace().collect();
  let position = tokens.iter().position(|t| t.eq_ignore_ascii_case("FROM"))?;
  tokens
    .get(position + 1)
    .map(|t| clean(t))
    .filter(|t| !t.is_empty())
}
