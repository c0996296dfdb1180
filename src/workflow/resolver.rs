//! Dependency Resolution
//!
//! Computes a stable topological execution order for a plan and answers
//! live readiness queries against the current step statuses.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::debug;

use crate::error::{EngineError, Result};

use super::model::{Plan, Step, StepStatus};

/// Computes the execution order as indices into `plan.steps`.
///
/// Uses Kahn's algorithm. Among steps whose dependencies are all placed,
/// the one declared first goes next, so the order is deterministic.
///
/// # Errors
///
/// * `UnknownDependency` - a step references an id not in the plan
/// * `CyclicDependency` - no valid order exists
pub fn resolve_order(plan: &Plan) -> Result<Vec<usize>> {
    let index_of: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; plan.steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plan.steps.len()];

    for (i, step) in plan.steps.iter().enumerate() {
        let unique: HashSet<&str> = step.dependencies.iter().map(String::as_str).collect();
        for dep in unique {
            let &dep_index = index_of.get(dep).ok_or_else(|| EngineError::UnknownDependency {
                step_id: step.id.clone(),
                dependency: dep.to_string(),
            })?;
            in_degree[i] += 1;
            dependents[dep_index].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(plan.steps.len());

    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);

        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != plan.steps.len() {
        let steps = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree > 0)
            .map(|(i, _)| plan.steps[i].id.clone())
            .collect();
        return Err(EngineError::CyclicDependency { steps });
    }

    debug!(
        "Execution order for plan '{}': {:?}",
        plan.id,
        order.iter().map(|&i| &plan.steps[i].id).collect::<Vec<_>>()
    );

    Ok(order)
}

/// Returns every step of the plan, each after all steps it depends on.
pub fn resolve_dependencies(plan: &Plan) -> Result<Vec<&Step>> {
    Ok(resolve_order(plan)?
        .into_iter()
        .map(|i| &plan.steps[i])
        .collect())
}

/// Returns true iff every dependency of `step` names a completed step in `plan`.
///
/// An unknown dependency id counts as not completed.
pub fn are_all_dependencies_completed(plan: &Plan, step: &Step) -> bool {
    step.dependencies.iter().all(|dep| {
        plan.get_step(dep)
            .is_some_and(|s| s.status == StepStatus::Completed)
    })
}

/// Returns pending steps whose dependencies have all completed.
pub fn ready_steps(plan: &Plan) -> Vec<&Step> {
    plan.steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .filter(|s| are_all_dependencies_completed(plan, s))
        .collect()
}
