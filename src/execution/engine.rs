//! Workflow Runner
//!
//! The engine facade. It owns the handler registry and offers:
//! - Sequential execution in dependency order, threading results forward
//! - Concurrency-bounded parallel execution of independent steps
//! - Retry with exponential backoff
//! - Timeout racing without cancelling the underlying handler
//! - Derived status and progress views
//!
//! Parallel execution is cooperative: every step future is polled on the
//! caller's task, and each one borrows its own step record from the plan.
//! Started work is never cancelled, in a parallel batch or on timeout.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{EngineError, HandlerError, Result};
use crate::workflow::model::{PREVIOUS_OUTPUT_KEY, PREVIOUS_RESULTS_KEY};
use crate::workflow::{resolve_order, ExecutionContext, Plan, PlanConfig, Step, StepError, StepStatus};

use super::handler::StepHandler;
use super::limiter::ConcurrencyLimiter;
use super::progress::{plan_progress, step_status, PlanProgress, StepStatusReport};
use super::step::{context_for, finish, StepExecutor, STEP_EXECUTION_TIMEOUT};

/// Default bound on simultaneously running parallel steps.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Default growth factor between retry delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Options for [`WorkflowRunner::execute_parallel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelOptions {
    /// Maximum steps in flight at once
    pub max_concurrency: usize,
    /// Collect failures instead of aborting on the first one
    pub continue_on_error: bool,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            continue_on_error: false,
        }
    }
}

impl ParallelOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// Options for [`WorkflowRunner::retry_step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: crate::workflow::model::DEFAULT_RETRY_ATTEMPTS,
            retry_delay: crate::workflow::model::DEFAULT_RETRY_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Delay before retry `n` (1-based): `retry_delay * multiplier^(n-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        if !factor.is_finite() || factor < 0.0 {
            return self.retry_delay;
        }
        // Float-to-int casts saturate, so huge schedules cap instead of wrapping
        Duration::from_nanos((self.retry_delay.as_nanos() as f64 * factor).round() as u64)
    }
}

impl From<&PlanConfig> for RetryOptions {
    fn from(config: &PlanConfig) -> Self {
        Self {
            max_retries: config.retry_attempts(),
            retry_delay: config.retry_delay(),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// Outcome of a timed-out handler and when it finished.
type LateOutcome = (std::result::Result<Value, HandlerError>, DateTime<Utc>);

/// Decrements the detached-handler count when the handler task ends.
struct DetachedGuard(Arc<AtomicUsize>);

impl DetachedGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for DetachedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plan execution engine.
///
/// Handlers are registered per step kind during setup; execution methods
/// then mutate step records in place.
///
/// # Example
///
/// ```rust,no_run
/// use planrunner::execution::{FnHandler, WorkflowRunner};
/// use planrunner::workflow::{ExecutionContext, Plan, Step};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut runner = WorkflowRunner::new();
///     runner.register_handler("tool", FnHandler::new(|step, _ctx| async move {
///         Ok(json!({ "ran": step.id }))
///     }));
///
///     let mut plan = Plan::new("p1", "Demo");
///     plan.add_step(Step::new("fetch", "tool", "Fetch"))?;
///     plan.add_step(Step::new("report", "tool", "Report").depends_on("fetch"))?;
///
///     let results = runner.execute_sequentially(&mut plan, &ExecutionContext::new("p1")).await?;
///     println!("{:?} ({})", results, runner.get_plan_progress(&plan));
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct WorkflowRunner {
    executor: StepExecutor,
    parallel_options: ParallelOptions,
    retry_options: RetryOptions,
    detached: Arc<AtomicUsize>,
    late: Mutex<HashMap<String, oneshot::Receiver<LateOutcome>>>,
}

impl WorkflowRunner {
    /// Creates a runner with no handlers and default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a step kind, replacing any previous one.
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: impl StepHandler + 'static) {
        self.executor.registry_mut().register(kind, handler);
    }

    /// Registers a handler shared with other owners.
    pub fn register_shared_handler(&mut self, kind: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.executor.registry_mut().register_arc(kind, handler);
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.executor.registry().contains(kind)
    }

    /// Sets the options used when `execute_parallel` is called with `None`.
    pub fn set_default_parallel_options(&mut self, options: ParallelOptions) {
        self.parallel_options = options;
    }

    /// Sets the options used when `retry_step` is called with `None`.
    pub fn set_default_retry_options(&mut self, options: RetryOptions) {
        self.retry_options = options;
    }

    pub fn parallel_options(&self) -> ParallelOptions {
        self.parallel_options
    }

    pub fn retry_options(&self) -> RetryOptions {
        self.retry_options
    }

    /// Number of handlers started by [`execute_with_timeout`](Self::execute_with_timeout)
    /// that are still running, including those whose caller already timed out.
    ///
    /// Zero means the timed-out work has actually stopped.
    pub fn detached_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    /// Executes one step against its registered handler.
    pub async fn execute_step(&self, step: &mut Step, context: &ExecutionContext) -> Result<Value> {
        self.executor.execute_step(step, context).await
    }

    /// Executes every step one at a time in dependency order.
    ///
    /// Each step's context carries `previousResults` (all outputs so far, in
    /// execution order) and `previousOutput` (the output of the step just
    /// before it; absent for the first step).
    ///
    /// The first failure aborts the remaining steps and is returned.
    pub async fn execute_sequentially(
        &self,
        plan: &mut Plan,
        context: &ExecutionContext,
    ) -> Result<Vec<Value>> {
        let order = resolve_order(plan)?;
        info!(
            "Executing plan '{}' sequentially ({} steps)",
            plan.id,
            order.len()
        );

        let mut results: Vec<Value> = Vec::with_capacity(order.len());

        for index in order {
            let step = &mut plan.steps[index];

            let mut step_context = context
                .for_step(&step.id)
                .with_data(PREVIOUS_RESULTS_KEY, Value::Array(results.clone()));
            if let Some(previous) = results.last() {
                step_context = step_context.with_data(PREVIOUS_OUTPUT_KEY, previous.clone());
            }

            match self.executor.execute_step(step, &step_context).await {
                Ok(output) => results.push(output),
                Err(e) => {
                    error!("Plan '{}' stopped at step '{}'", plan.id, plan.steps[index].id);
                    plan.touch();
                    return Err(e);
                }
            }
        }

        plan.touch();
        info!("Plan '{}' completed ({} steps)", plan.id, results.len());
        Ok(results)
    }

    /// Executes the plan's independent steps concurrently.
    ///
    /// Only steps with no dependencies are considered; steps that depend on
    /// others are left untouched. At most `max_concurrency` steps run at
    /// once, admitted in declaration order. Results are index-aligned with
    /// the independent steps in declaration order.
    ///
    /// No step is cancelled once the batch starts: every independent step
    /// runs to completion and its record reflects what its handler did.
    /// With `continue_on_error == false` the first failure observed is
    /// returned and the other results are discarded. With
    /// `continue_on_error == true` all failures are returned together as
    /// `AggregateParallel`.
    ///
    /// `options == None` uses the runner's default parallel options.
    pub async fn execute_parallel(
        &self,
        plan: &mut Plan,
        context: &ExecutionContext,
        options: Option<ParallelOptions>,
    ) -> Result<Vec<Value>> {
        let options = options.unwrap_or(self.parallel_options);
        let limiter = ConcurrencyLimiter::new(options.max_concurrency);
        let batch_len = plan.steps.iter().filter(|s| s.is_independent()).count();

        info!(
            "Executing {} independent step(s) of plan '{}' (max concurrency: {}, continue on error: {})",
            batch_len,
            plan.id,
            limiter.capacity(),
            options.continue_on_error
        );

        let executor = &self.executor;
        let limiter = &limiter;
        let mut in_flight: FuturesUnordered<_> = plan
            .steps
            .iter_mut()
            .filter(|s| s.is_independent())
            .enumerate()
            .map(|(position, step)| {
                let step_context = context.for_step(&step.id);
                async move {
                    let _permit = limiter.acquire().await;
                    (position, executor.execute_step(step, &step_context).await)
                }
            })
            .collect();

        let mut outputs: Vec<Option<Value>> = vec![None; batch_len];
        // In the order observed
        let mut failures: Vec<(usize, EngineError)> = Vec::new();

        while let Some((position, outcome)) = in_flight.next().await {
            match outcome {
                Ok(output) => outputs[position] = Some(output),
                Err(e) => {
                    if failures.is_empty() && !options.continue_on_error {
                        warn!(
                            "Parallel batch of plan '{}' failed, letting the remaining steps finish: {}",
                            plan.id, e
                        );
                    }
                    failures.push((position, e));
                }
            }
        }
        drop(in_flight);
        plan.touch();

        if failures.is_empty() {
            return Ok(outputs.into_iter().flatten().collect());
        }

        warn!(
            "{} of {} parallel step(s) failed in plan '{}'",
            failures.len(),
            batch_len,
            plan.id
        );

        if !options.continue_on_error {
            let (_, first) = failures.swap_remove(0);
            return Err(first);
        }

        failures.sort_by_key(|(position, _)| *position);
        let messages: Vec<String> = failures.iter().map(|(_, e)| e.to_string()).collect();
        Err(EngineError::AggregateParallel {
            error_count: messages.len(),
            messages,
        })
    }

    /// Executes a step, retrying failures with exponential backoff.
    ///
    /// Makes up to `max_retries + 1` attempts. Before retry `n` it waits
    /// `retry_delay * backoff_multiplier^(n-1)` and resets the step to
    /// pending. The last attempt's error is returned unchanged.
    ///
    /// `options == None` uses the runner's default retry options.
    pub async fn retry_step(
        &self,
        step: &mut Step,
        context: &ExecutionContext,
        options: Option<RetryOptions>,
    ) -> Result<Value> {
        let options = options.unwrap_or(self.retry_options);
        let attempts = options.max_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            match self.executor.execute_step(step, context).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!("Step '{}' succeeded on attempt {}/{}", step.id, attempt, attempts);
                    }
                    return Ok(output);
                }
                Err(e) if attempt >= attempts => {
                    error!(
                        "Step '{}' failed after {} attempt(s): {}",
                        step.id, attempt, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = options.delay_for(attempt);
                    warn!(
                        "Step '{}' attempt {}/{} failed: {}. Retrying in {:?}",
                        step.id, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    step.reset();
                    attempt += 1;
                }
            }
        }
    }

    /// Races a step's execution against a timer.
    ///
    /// The handler runs as a detached task. If the timer wins, the caller
    /// gets `StepExecutionTimeout` while the handler keeps running: the
    /// step stays `running` and gains an `endTime` and a
    /// `STEP_EXECUTION_TIMEOUT` error.
    ///
    /// The handler's eventual outcome is held by the runner until the caller
    /// applies it with [`reconcile_step`](Self::reconcile_step),
    /// [`reconcile_plan`](Self::reconcile_plan) or
    /// [`await_late_result`](Self::await_late_result). Until then the step
    /// record still reads `running`, even if the handler has finished.
    /// [`detached_count`](Self::detached_count) tells whether the work has
    /// actually stopped.
    pub async fn execute_with_timeout(
        &self,
        step: &mut Step,
        context: &ExecutionContext,
        timeout: Duration,
    ) -> Result<Value> {
        let handler = self.executor.begin(step)?;
        let snapshot = step.clone();
        let step_context = context_for(step, context).into_owned();
        let guard = DetachedGuard::new(Arc::clone(&self.detached));
        let (tx, mut rx) = oneshot::channel();

        tokio::spawn(async move {
            let _guard = guard;
            let result = AssertUnwindSafe(handler.handle(&snapshot, &step_context))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(format!("handler for step '{}' panicked", snapshot.id).into()));
            // The receiver is gone if a later timeout of the same step replaced it
            let _ = tx.send((result, Utc::now()));
        });

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok((result, _))) => finish(step, result),
            Ok(Err(_)) => finish(step, Err("handler task ended without a result".into())),
            Err(_) => {
                let err = EngineError::StepExecutionTimeout {
                    step_id: step.id.clone(),
                    timeout,
                };
                warn!("{}; its handler is still running", err);
                step.mark_timed_out(StepError::new(STEP_EXECUTION_TIMEOUT, err.to_string()));
                self.late_results().insert(step.id.clone(), rx);
                Err(err)
            }
        }
    }

    /// Applies the outcome of a timed-out handler that has since finished.
    ///
    /// Returns `None` while the handler is still running, or when `step` has
    /// no timed-out execution pending. An outcome arriving for a step that
    /// was reset or re-run since its timeout is discarded.
    pub fn reconcile_step(&self, step: &mut Step) -> Option<Result<Value>> {
        let outcome = {
            let mut late = self.late_results();
            let received = late.get_mut(&step.id)?.try_recv();
            if !matches!(received, Err(TryRecvError::Empty)) {
                late.remove(&step.id);
            }
            received.ok()?
        };
        settle_late(step, outcome)
    }

    /// Reconciles every step of the plan. Returns how many steps were settled.
    pub fn reconcile_plan(&self, plan: &mut Plan) -> usize {
        let settled = plan
            .steps
            .iter_mut()
            .filter_map(|step| self.reconcile_step(step))
            .count();
        if settled > 0 {
            plan.touch();
        }
        settled
    }

    /// Waits for the timed-out handler of `step` to finish, then applies
    /// its outcome as [`reconcile_step`](Self::reconcile_step) does.
    pub async fn await_late_result(&self, step: &mut Step) -> Option<Result<Value>> {
        let receiver = self.late_results().remove(&step.id)?;
        let outcome = receiver.await.ok()?;
        settle_late(step, outcome)
    }

    fn late_results(&self) -> MutexGuard<'_, HashMap<String, oneshot::Receiver<LateOutcome>>> {
        self.late.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status view of a single step.
    pub fn get_step_status(&self, step: &Step) -> StepStatusReport {
        step_status(step)
    }

    /// Progress view of a whole plan.
    pub fn get_plan_progress(&self, plan: &Plan) -> PlanProgress {
        plan_progress(plan)
    }
}

/// Applies a late handler outcome to a step still in its timed-out state.
fn settle_late(step: &mut Step, (result, finished_at): LateOutcome) -> Option<Result<Value>> {
    let timed_out = step.status == StepStatus::Running
        && step
            .error
            .as_ref()
            .is_some_and(|e| e.code == STEP_EXECUTION_TIMEOUT);
    if !timed_out {
        debug!("Discarding late result for step '{}' (status: {})", step.id, step.status);
        return None;
    }

    info!("Step '{}' finished after its timeout", step.id);
    let outcome = finish(step, result);
    step.end_time = Some(finished_at);
    Some(outcome)
}
