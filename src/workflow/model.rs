//! Plan Data Model
//!
//! Core data structures representing plans, their steps and the
//! per-invocation execution context.
//!
//! # Example YAML Format
//!
//! ```yaml
//! id: release-notes
//! name: Release notes
//! config:
//!   retryAttempts: 2
//!   retryDelay: 500
//! steps:
//!   - id: collect
//!     kind: tool
//!     name: Collect merged changes
//!     input:
//!       since: v1.4.0
//!
//!   - id: summarize
//!     kind: agent
//!     name: Summarize changes
//!     dependencies:
//!       - collect
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key holding the outputs of every step executed so far.
pub const PREVIOUS_RESULTS_KEY: &str = "previousResults";

/// Context key holding the output of the immediately preceding step.
pub const PREVIOUS_OUTPUT_KEY: &str = "previousOutput";

/// Lifecycle status of a step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step has not started yet
    #[default]
    Pending,
    /// Step's handler is executing
    Running,
    /// Step finished successfully
    Completed,
    /// Step's handler failed
    Failed,
    /// Suspended by code outside the engine. Never assigned by the engine itself.
    Paused,
}

impl StepStatus {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a step record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepError {
    /// Machine-readable code, e.g. `STEP_EXECUTION_ERROR`
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Raw underlying cause, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A single unit of declared work within a plan.
///
/// The `kind` selects which registered handler executes the step. Status,
/// output, error and timestamps are written by the engine in place while
/// the step runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier within the plan
    pub id: String,

    /// Handler selector (e.g. "tool", "agent", "checkpoint")
    pub kind: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: StepStatus,

    /// IDs of steps that must complete before this step can run
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Payload produced by the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Set once the step reaches a terminal or timed-out state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Step {
    /// Creates a new pending step.
    ///
    /// # Example
    ///
    /// ```
    /// use planrunner::workflow::Step;
    ///
    /// let step = Step::new("summarize", "agent", "Summarize changes")
    ///     .with_description("Turn the change list into prose")
    ///     .depends_on("collect");
    /// ```
    pub fn new(id: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            kind: kind.into().trim().to_string(),
            name: name.into(),
            description: None,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            input: None,
            output: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the input payload handed to the handler.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    /// Returns true if the step declares no dependencies.
    pub fn is_independent(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Time between start and end, if both are recorded.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Returns the step to `Pending`, clearing results and timestamps.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.output = None;
        self.error = None;
        self.start_time = None;
        self.end_time = None;
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.error = None;
    }

    pub(crate) fn mark_completed(&mut self, output: Value) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.end_time = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: StepError) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.end_time = Some(Utc::now());
    }

    /// Records that the caller stopped waiting. Status stays `Running`
    /// because the handler has not stopped.
    pub(crate) fn mark_timed_out(&mut self, error: StepError) {
        self.error = Some(error);
        self.end_time = Some(Utc::now());
    }
}

/// Default step limit per plan
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Default per-step timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Default retry attempts
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// Execution configuration attached to a plan.
///
/// Every field is optional; the accessor methods apply the documented defaults.
/// Durations are expressed in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
}

impl PlanConfig {
    /// Maximum number of steps the plan may declare (default 50).
    pub fn max_steps(&self) -> usize {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    /// Per-step timeout (default 5 minutes).
    pub fn timeout(&self) -> Duration {
        self.timeout
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Number of retries after the first attempt (default 3).
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS)
    }

    /// Delay before the first retry (default 1 second).
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY)
    }
}

/// An ordered collection of steps plus execution configuration.
///
/// Step order is declaration order, not necessarily execution order.
/// The plan owns its steps; execution paths borrow them in place so status
/// changes are visible to anyone holding the plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub config: PlanConfig,

    /// Free-form data supplied by whoever built the plan
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    /// Creates a new empty plan.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
            config: PlanConfig::default(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_config(mut self, config: PlanConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a step to the plan.
    pub fn add_step(&mut self, step: Step) -> Result<(), String> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(format!("Step '{}' already exists", step.id));
        }
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Gets a mutable reference to a step by ID.
    pub fn get_step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Returns the arena index of a step.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Returns steps with no dependencies.
    pub fn independent_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.is_independent()).collect()
    }

    /// Returns the number of steps in the plan.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Per-invocation record handed to a step handler.
///
/// A fresh context is derived for every step invocation; parallel steps
/// each get their own copy layered on the caller's base context.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub plan_id: String,

    /// Step currently executing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    #[serde(default)]
    pub data: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Copies this context for one step invocation.
    pub fn for_step(&self, step_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.step_id = Some(step_id.to_string());
        ctx
    }

    /// Outputs of the steps executed before this one, in execution order.
    pub fn previous_results(&self) -> Option<&Vec<Value>> {
        self.data.get(PREVIOUS_RESULTS_KEY).and_then(Value::as_array)
    }

    /// Output of the immediately preceding step.
    pub fn previous_output(&self) -> Option<&Value> {
        self.data.get(PREVIOUS_OUTPUT_KEY)
    }
}
