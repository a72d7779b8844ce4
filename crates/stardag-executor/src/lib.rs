//! Stardag Executor
//!
//! Walks a validated task graph, dispatching nodes whose upstreams have all
//! succeeded, retrying retryable failures and skipping everything below a
//! failed node.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PipelineRunner                         │
//! │  - owns the pipeline definition and an mpsc channel         │
//! │  - trigger(request) queues a run                            │
//! │  - start(cancel) runs queued requests one by one            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │  fresh TaskGraph + ExecutionContext per run
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Executor                            │
//! │  - run(graph, ctx, resume, cancel) → RunReport              │
//! │  - AND-join dispatch on a bounded JoinSet                   │
//! │  - per-node retries, skip propagation, fail-fast            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Operator                             │
//! │  - stage / fact / dimension load, quality check, no-op      │
//! │  - one pooled warehouse connection per invocation           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stardag_executor::{Executor, ExecutorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let graph = TaskGraph::from_pipeline(&pipeline)?;
//! let ctx = ExecutionContext::new(logical_date, credentials);
//!
//! let executor = Executor::new(warehouse, ExecutorConfig::default());
//! let report = executor.run(&graph, &ctx, None, CancellationToken::new()).await?;
//! ```

mod config;
mod error;
mod events;
mod executor;
mod report;
mod runner;

pub use config::{ExecutorConfig, FailurePolicy, default_max_parallelism};
pub use error::ExecutionError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::Executor;
pub use report::{NodeReport, RunReport, RunStatus};
pub use runner::{PipelineRunner, RunRequest, RunnerError};
