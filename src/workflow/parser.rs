//! Plan Parser
//!
//! Loads plan definitions from YAML or JSON. Parsed plans are validated
//! before they are handed back, so unresolved dependency references and
//! cycles surface at plan-build time rather than mid-execution.

use std::fs;
use std::path::Path;

use chrono::Utc;
use log::{debug, info};

use crate::error::{EngineError, Result};

use super::model::Plan;
use super::validator::validate_plan;

/// Parses and validates a plan definition.
///
/// JSON is accepted as well, since it is a subset of YAML.
pub fn parse_plan(content: &str) -> Result<Plan> {
    let plan: Plan = serde_yaml::from_str(content).map_err(|e| EngineError::PlanParse {
        message: e.to_string(),
    })?;

    prepare(plan)
}

/// Loads a plan definition from a file.
///
/// Files ending in `.json` are parsed with `serde_json`, everything else
/// as YAML.
///
/// # Example
///
/// ```rust,no_run
/// use planrunner::workflow::load_plan;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plan = load_plan("release-notes.yaml")?;
///     println!("Loaded {} steps", plan.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_plan(path: impl AsRef<Path>) -> Result<Plan> {
    let path = path.as_ref();
    info!("Loading plan from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| EngineError::PlanRead {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Plan content loaded ({} bytes)", content.len());

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let plan: Plan = serde_json::from_str(&content).map_err(|e| EngineError::PlanParse {
            message: e.to_string(),
        })?;
        prepare(plan)
    } else {
        parse_plan(&content)
    }
}

/// Serializes a plan, including live step state, to YAML.
pub fn to_yaml(plan: &Plan) -> Result<String> {
    serde_yaml::to_string(plan).map_err(|e| EngineError::PlanParse {
        message: e.to_string(),
    })
}

fn prepare(mut plan: Plan) -> Result<Plan> {
    info!("Parsed plan '{}' with {} steps", plan.id, plan.steps.len());

    validate_plan(&plan)?;

    let finished = plan.steps.iter().filter(|s| s.status.is_terminal()).count();
    if finished > 0 {
        debug!(
            "Plan '{}' carries {} finished step(s) from an earlier run",
            plan.id, finished
        );
    }

    plan.updated_at = Utc::now();
    Ok(plan)
}
