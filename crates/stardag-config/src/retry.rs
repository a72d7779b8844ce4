use std::time::Duration;

/// Retry policy applied by the executor to retryable operator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total number of invocations allowed, including the first one.
  pub max_attempts: u32,
  /// Fixed delay between two attempts.
  pub delay: Duration,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      delay,
    }
  }

  /// Build a policy from a retry count: one initial attempt plus `retries` more.
  pub fn from_retries(retries: u32, delay: Duration) -> Self {
    Self::new(retries.saturating_add(1), delay)
  }

  /// A single attempt, no retries.
  pub fn once() -> Self {
    Self::new(1, Duration::ZERO)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::once()
  }
}
