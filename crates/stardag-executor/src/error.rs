use thiserror::Error;

/// Errors that abort a run as a whole rather than failing a single node.
#[derive(Debug, Error)]
pub enum ExecutionError {
  #[error("resume snapshot references unknown node '{node_id}'")]
  UnknownNode { node_id: String },

  #[error("task join error: {message}")]
  TaskJoin { message: String },
}
