//! Individual Step Execution
//!
//! Executes one step against the handler registered for its kind and keeps
//! the step record's status, output, error and timestamps current:
//!
//! - `pending -> running` when the invocation starts
//! - `running -> completed` with the handler's output
//! - `running -> failed` with a structured `STEP_EXECUTION_ERROR`
//!
//! Failures are recorded on the step and then returned to the caller,
//! never swallowed.

use std::borrow::Cow;
use std::sync::Arc;

use log::{debug, error, info};
use serde_json::{json, Value};

use crate::error::{EngineError, HandlerError, Result};
use crate::workflow::{ExecutionContext, Step, StepError};

use super::handler::{HandlerRegistry, StepHandler};

/// Step error code for handler failures and missing handlers.
pub const STEP_EXECUTION_ERROR: &str = "STEP_EXECUTION_ERROR";

/// Step error code recorded when the caller stopped waiting for a step.
pub const STEP_EXECUTION_TIMEOUT: &str = "STEP_EXECUTION_TIMEOUT";

/// Executes single steps against a handler registry.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    registry: HandlerRegistry,
}

impl StepExecutor {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Executes a single step.
    ///
    /// The handler receives `context` with its `step_id` pointing at `step`.
    ///
    /// # Returns
    ///
    /// * `Ok(output)` - Step completed; `output` is also stored on the step
    /// * `Err(NoHandlerRegistered)` - No handler for `step.kind`; step is `failed`
    /// * `Err(StepExecution)` - Handler failed; step is `failed`
    pub async fn execute_step(&self, step: &mut Step, context: &ExecutionContext) -> Result<Value> {
        let handler = self.begin(step)?;
        let context = context_for(step, context);

        let result = handler.handle(step, &context).await;
        finish(step, result)
    }

    /// Moves the step to `running` and resolves its handler.
    ///
    /// A missing handler fails the step immediately.
    pub(crate) fn begin(&self, step: &mut Step) -> Result<Arc<dyn StepHandler>> {
        step.mark_running();
        info!("Starting step: {} ({})", step.id, step.kind);

        match self.registry.get(&step.kind) {
            Some(handler) => Ok(handler),
            None => {
                let err = EngineError::NoHandlerRegistered {
                    step_type: step.kind.clone(),
                    step_id: step.id.clone(),
                };
                error!("{}", err);
                step.mark_failed(StepError::new(STEP_EXECUTION_ERROR, err.to_string()));
                Err(err)
            }
        }
    }
}

/// Returns the context a handler should see for `step`.
pub(crate) fn context_for<'a>(step: &Step, context: &'a ExecutionContext) -> Cow<'a, ExecutionContext> {
    if context.step_id.as_deref() == Some(step.id.as_str()) {
        Cow::Borrowed(context)
    } else {
        Cow::Owned(context.for_step(&step.id))
    }
}

/// Applies a handler result to a running step.
pub(crate) fn finish(step: &mut Step, result: std::result::Result<Value, HandlerError>) -> Result<Value> {
    match result {
        Ok(output) => {
            step.mark_completed(output.clone());
            info!(
                "Step '{}' completed in {}ms",
                step.id,
                step.duration().map_or(0, |d| d.as_millis())
            );
            Ok(output)
        }
        Err(source) => {
            let message = source.to_string();
            error!("Step '{}' failed: {}", step.id, message);
            debug!("Step '{}' failure details: {:?}", step.id, source);

            step.mark_failed(
                StepError::new(STEP_EXECUTION_ERROR, message.clone())
                    .with_details(json!(format!("{:?}", source))),
            );
            Err(EngineError::StepExecution {
                step_id: step.id.clone(),
                message,
                source,
            })
        }
    }
}
