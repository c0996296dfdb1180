//! Plan Execution Module
//!
//! Provides the engine that runs plan steps against registered handlers,
//! sequentially or with bounded parallelism, with retry and timeout.
//!
//! # Architecture
//!
//! - [`engine`]: The workflow runner facade
//! - [`handler`]: Step handler trait and registry
//! - [`limiter`]: Counting concurrency limiter
//! - [`progress`]: Status and progress views
//! - [`step`]: Individual step execution logic

pub mod engine;
pub mod handler;
pub mod limiter;
pub mod progress;
pub mod step;

pub use engine::{ParallelOptions, RetryOptions, WorkflowRunner};
pub use handler::{FnHandler, HandlerRegistry, StepHandler};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use progress::{PlanProgress, StepStatusReport};
pub use step::StepExecutor;
