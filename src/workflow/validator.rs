//! Plan Validation
//!
//! Build-time checks for plan structure:
//! - Step field validation
//! - Unique step ids and reference integrity
//! - Step count limit from the plan config
//! - Dependency graph validation (no cycles)

use std::collections::HashSet;

use log::{debug, info};

use crate::error::{EngineError, Result};

use super::model::{Plan, Step};
use super::resolver::resolve_order;

/// Validation problems reported for a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyPlan,
    DuplicateStepId(String),
    EmptyStepId,
    EmptyKind(String),
    UnknownDependency { step: String, dependency: String },
    TooManySteps { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPlan => write!(f, "Plan has no steps"),
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::EmptyStepId => write!(f, "Step has empty or whitespace-only ID"),
            Self::EmptyKind(step) => write!(f, "Step '{}' has no kind specified", step),
            Self::UnknownDependency { step, dependency } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, dependency)
            }
            Self::TooManySteps { count, max } => {
                write!(f, "Plan declares {} steps but allows at most {}", count, max)
            }
        }
    }
}

/// Validates a single step's fields.
fn validate_step(step: &Step) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId);
        return errors;
    }

    if step.kind.trim().is_empty() {
        errors.push(ValidationError::EmptyKind(step.id.clone()));
    }

    if step.is_independent() {
        debug!("Step '{}' is independent (no dependencies)", step.id);
    }

    errors
}

/// Collects every structural problem in the plan without stopping at the first.
///
/// Cycles are not reported here; see [`validate_plan`].
fn collect_errors(plan: &Plan) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if plan.steps.is_empty() {
        errors.push(ValidationError::EmptyPlan);
        return errors;
    }

    let max = plan.config.max_steps();
    if plan.steps.len() > max {
        errors.push(ValidationError::TooManySteps {
            count: plan.steps.len(),
            max,
        });
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &plan.steps {
        if !seen_ids.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &plan.steps {
        errors.extend(validate_step(step));

        for dep in &step.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    errors
}

/// Validates the entire plan structure.
///
/// Performs the following checks:
/// 1. Plan is not empty
/// 2. Step count is within `config.maxSteps`
/// 3. No duplicate step IDs
/// 4. All steps have valid fields
/// 5. All dependencies point to existing steps
/// 6. No cyclic dependencies
///
/// Structural problems are reported together as `InvalidPlan`; a cycle is
/// reported as `CyclicDependency`.
pub fn validate_plan(plan: &Plan) -> Result<()> {
    info!("Validating plan '{}' with {} steps", plan.id, plan.steps.len());

    let errors = collect_errors(plan);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(EngineError::invalid_plan(messages.join("\n")));
    }

    resolve_order(plan)?;

    info!("Plan '{}' validated", plan.id);
    Ok(())
}

/// Quick validation that returns a list of error messages.
///
/// Includes a cycle message when the graph is otherwise well formed.
pub fn quick_validate(plan: &Plan) -> Vec<String> {
    let mut messages: Vec<String> = collect_errors(plan).iter().map(|e| e.to_string()).collect();

    if messages.is_empty() {
        if let Err(e) = resolve_order(plan) {
            messages.push(e.to_string());
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::PlanConfig;

    fn plan_of(steps: Vec<Step>) -> Plan {
        let mut plan = Plan::new("p", "Plan");
        plan.steps = steps;
        plan
    }

    #[test]
    fn test_valid_plan() {
        let plan = plan_of(vec![
            Step::new("a", "tool", "A"),
            Step::new("b", "agent", "B").depends_on("a"),
        ]);

        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_empty_plan() {
        let plan = Plan::new("p", "Plan");
        let err = validate_plan(&plan).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan { .. }));
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_duplicate_ids() {
        let plan = plan_of(vec![
            Step::new("same", "tool", "1"),
            Step::new("same", "tool", "2"),
        ]);

        let err = validate_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("Duplicate step ID: 'same'"));
    }

    #[test]
    fn test_unknown_dependency() {
        let plan = plan_of(vec![Step::new("a", "tool", "A").depends_on("ghost")]);

        let err = validate_plan(&plan).unwrap_err();
        assert_eq!(err.code(), "INVALID_PLAN");
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_cyclic_dependency() {
        let plan = plan_of(vec![
            Step::new("a", "tool", "A").depends_on("b"),
            Step::new("b", "tool", "B").depends_on("a"),
        ]);

        assert!(matches!(
            validate_plan(&plan),
            Err(EngineError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_too_many_steps() {
        let mut plan = plan_of(vec![
            Step::new("a", "tool", "A"),
            Step::new("b", "tool", "B"),
            Step::new("c", "tool", "C"),
        ]);
        plan.config = PlanConfig {
            max_steps: Some(2),
            ..PlanConfig::default()
        };

        let err = validate_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("at most 2"));
    }

    #[test]
    fn test_validate_step_empty_id() {
        let errors = validate_step(&Step::new("  ", "tool", "Blank"));
        assert_eq!(errors, vec![ValidationError::EmptyStepId]);
    }

    #[test]
    fn test_validate_step_empty_kind() {
        let errors = validate_step(&Step::new("a", "", "A"));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyKind(_))));
    }

    #[test]
    fn test_quick_validate_reports_all_problems() {
        let plan = plan_of(vec![
            Step::new("a", "", "A").depends_on("ghost"),
            Step::new("a", "tool", "A again"),
        ]);

        let messages = quick_validate(&plan);
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.contains("Duplicate")));
        assert!(messages.iter().any(|m| m.contains("no kind")));
        assert!(messages.iter().any(|m| m.contains("ghost")));
    }

    #[test]
    fn test_quick_validate_reports_cycle() {
        let plan = plan_of(vec![
            Step::new("a", "tool", "A").depends_on("b"),
            Step::new("b", "tool", "B").depends_on("a"),
        ]);

        let messages = quick_validate(&plan);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Cyclic"));
    }

    #[test]
    fn test_quick_validate_valid() {
        let plan = plan_of(vec![Step::new("a", "tool", "A")]);
        assert!(quick_validate(&plan).is_empty());
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(ValidationError::EmptyPlan.to_string(), "Plan has no steps");
        let err = ValidationError::TooManySteps { count: 3, max: 2 };
        assert!(err.to_string().contains('3'));
    }
}
