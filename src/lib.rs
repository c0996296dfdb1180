//! PlanRunner - Plan Execution Engine
//!
//! Runs plans of interdependent steps by dispatching each step to a
//! handler registered for its kind. Plans can be executed sequentially in
//! dependency order or as concurrency-bounded batches of independent
//! steps, with retry and timeout wrappers around single steps.
//!
//! # Architecture
//!
//! The library is organized into three modules:
//!
//! - [`workflow`]: Plan data model, loading, validation and dependency resolution
//! - [`execution`]: Handlers, concurrency limiting and the workflow runner
//! - [`error`]: The engine's error type
//!
//! # Example
//!
//! ```rust,no_run
//! use planrunner::execution::{FnHandler, ParallelOptions, WorkflowRunner};
//! use planrunner::{load_plan, ExecutionContext};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a plan from YAML
//!     let mut plan = load_plan("plan.yaml")?;
//!
//!     // Register one handler per step kind
//!     let mut runner = WorkflowRunner::new();
//!     runner.register_handler("tool", FnHandler::new(|step, _ctx| async move {
//!         Ok(json!({ "done": step.id }))
//!     }));
//!
//!     // Run the independent steps, four at a time
//!     let context = ExecutionContext::new(plan.id.clone());
//!     let options = ParallelOptions::default().with_max_concurrency(4);
//!     runner.execute_parallel(&mut plan, &context, Some(options)).await?;
//!
//!     println!("{}", runner.get_plan_progress(&plan));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod workflow;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use execution::engine::WorkflowRunner;
pub use workflow::model::{ExecutionContext, Plan, Step, StepStatus};
pub use workflow::parser::{load_plan, parse_plan};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "PlanRunner";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::FnHandler;
    use serde_json::json;

    const PLAN_YAML: &str = r#"
id: smoke
name: Smoke plan
steps:
  - id: fetch
    kind: tool
    name: Fetch
  - id: summarize
    kind: tool
    name: Summarize
    dependencies: [fetch]
  - id: review
    kind: checkpoint
    name: Review
    dependencies: [summarize]
"#;

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "PlanRunner");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new("fetch", "tool", "Fetch data");
        assert_eq!(step.id, "fetch");
        assert_eq!(step.kind, "tool");
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_module_exports_plan() {
        let plan = Plan::new("p1", "Plan");
        assert!(plan.is_empty());
        assert_eq!(WorkflowRunner::new().get_plan_progress(&plan).total, 0);
    }

    #[tokio::test]
    async fn test_parse_and_run_through_reexports() {
        let mut plan = parse_plan(PLAN_YAML).unwrap();
        let mut runner = WorkflowRunner::new();
        runner.register_handler(
            "tool",
            FnHandler::new(|step: Step, ctx: ExecutionContext| async move {
                Ok(json!({ "step": step.id, "after": ctx.previous_output().cloned() }))
            }),
        );

        let err: EngineError = runner
            .execute_sequentially(&mut plan, &ExecutionContext::new("smoke"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_HANDLER_REGISTERED");
        assert_eq!(err.step_id(), Some("review"));

        let summarize = plan.get_step("summarize").unwrap();
        assert_eq!(
            summarize.output,
            Some(json!({ "step": "summarize", "after": { "step": "fetch", "after": null } }))
        );

        let progress = runner.get_plan_progress(&plan);
        assert_eq!((progress.completed, progress.failed), (2, 1));
    }
}
