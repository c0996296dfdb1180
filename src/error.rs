//! Engine Errors
//!
//! Defines [`EngineError`], the single error type returned by plan
//! validation, dependency resolution and step execution, plus the
//! [`HandlerError`] shape step handlers fail with.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error type step handlers return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced while building, resolving or executing a plan.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No handler is registered for the step's kind.
    #[error("No handler registered for step type '{step_type}' (step '{step_id}')")]
    NoHandlerRegistered { step_type: String, step_id: String },

    /// The step's handler failed.
    #[error("Step '{step_id}' failed: {message}")]
    StepExecution {
        step_id: String,
        message: String,
        #[source]
        source: HandlerError,
    },

    /// The plan's dependency graph contains a cycle.
    #[error("Cyclic dependency between steps: {}", steps.join(", "))]
    CyclicDependency { steps: Vec<String> },

    /// A step depends on an id that is not in the plan.
    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    /// The caller stopped waiting for a step. The handler may still be running.
    #[error("Step '{step_id}' timed out after {}ms", timeout.as_millis())]
    StepExecutionTimeout { step_id: String, timeout: Duration },

    /// One or more parallel steps failed under best-effort execution.
    #[error("{error_count} parallel step(s) failed: {}", messages.join("; "))]
    AggregateParallel {
        error_count: usize,
        messages: Vec<String>,
    },

    /// The plan violates a build-time invariant.
    #[error("Invalid plan: {message}")]
    InvalidPlan { message: String },

    /// A plan definition file could not be read.
    #[error("Failed to read plan file '{}': {source}", path.display())]
    PlanRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A plan definition could not be parsed.
    #[error("Failed to parse plan: {message}")]
    PlanParse { message: String },
}

impl EngineError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoHandlerRegistered { .. } => "NO_HANDLER_REGISTERED",
            Self::StepExecution { .. } => "STEP_EXECUTION_ERROR",
            Self::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Self::UnknownDependency { .. } => "UNKNOWN_DEPENDENCY",
            Self::StepExecutionTimeout { .. } => "STEP_EXECUTION_TIMEOUT",
            Self::AggregateParallel { .. } => "AGGREGATE_PARALLEL_ERROR",
            Self::InvalidPlan { .. } => "INVALID_PLAN",
            Self::PlanRead { .. } => "PLAN_READ_ERROR",
            Self::PlanParse { .. } => "PLAN_PARSE_ERROR",
        }
    }

    /// Id of the step this error concerns, if it concerns a single step.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::NoHandlerRegistered { step_id, .. }
            | Self::StepExecution { step_id, .. }
            | Self::UnknownDependency { step_id, .. }
            | Self::StepExecutionTimeout { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    pub(crate) fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan {
            message: message.into(),
        }
    }
}
