use serde::{Deserialize, Serialize};

/// A dependency between two nodes: `to` may only run after `from` succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub from: String,
  pub to: String,
}

impl Edge {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
    }
  }
}
