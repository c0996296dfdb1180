//! Plan Definition Module
//!
//! Provides data structures and utilities for defining, loading and
//! validating plans of interdependent steps.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Plan, ExecutionContext)
//! - [`parser`]: YAML/JSON parsing and loading
//! - [`resolver`]: Dependency ordering and readiness queries
//! - [`validator`]: Structural validation rules

pub mod model;
pub mod parser;
pub mod resolver;
pub mod validator;

pub use model::{ExecutionContext, Plan, PlanConfig, Step, StepError, StepStatus};
pub use parser::{load_plan, parse_plan, to_yaml};
pub use resolver::{are_all_dependencies_completed, ready_steps, resolve_dependencies, resolve_order};
pub use validator::{quick_validate, validate_plan, ValidationError};
