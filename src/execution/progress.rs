//! Status and Progress Views
//!
//! Pure views derived by scanning step records. The engine pushes no
//! events; consumers poll these after each call.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::{Plan, Step, StepError, StepStatus};

/// Snapshot of a single step's execution state.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepStatusReport {
    pub id: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in milliseconds, once the step has ended
    pub duration_ms: Option<u64>,
    pub error: Option<StepError>,
}

/// Aggregate progress of a plan.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: usize,
    /// `round(completed / total * 100)`, 0 for an empty plan
    pub percentage: u32,
}

impl PlanProgress {
    /// Returns true once every step is completed or failed.
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

impl fmt::Display for PlanProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} completed ({}%), {} failed, {} running, {} pending",
            self.completed, self.total, self.percentage, self.failed, self.running, self.pending
        )?;
        if self.paused > 0 {
            write!(f, ", {} paused", self.paused)?;
        }
        Ok(())
    }
}

/// Builds the status report for one step.
pub fn step_status(step: &Step) -> StepStatusReport {
    StepStatusReport {
        id: step.id.clone(),
        status: step.status,
        start_time: step.start_time,
        end_time: step.end_time,
        duration_ms: step.duration().map(|d| d.as_millis() as u64),
        error: step.error.clone(),
    }
}

/// Counts steps per status.
pub fn plan_progress(plan: &Plan) -> PlanProgress {
    let mut progress = PlanProgress {
        total: plan.steps.len(),
        ..PlanProgress::default()
    };

    for step in &plan.steps {
        match step.status {
            StepStatus::Pending => progress.pending += 1,
            StepStatus::Running => progress.running += 1,
            StepStatus::Completed => progress.completed += 1,
            StepStatus::Failed => progress.failed += 1,
            StepStatus::Paused => progress.paused += 1,
        }
    }

    if progress.total > 0 {
        progress.percentage =
            (progress.completed as f64 / progress.total as f64 * 100.0).round() as u32;
    }

    progress
}
