//! Step Handlers
//!
//! Handlers perform the actual work of a step. The engine looks them up by
//! step kind and invokes them polymorphically; it never implements one.
//!
//! Handlers can be written as types implementing [`StepHandler`], or as
//! async closures wrapped in [`FnHandler`]:
//!
//! ```
//! use planrunner::execution::{FnHandler, HandlerRegistry};
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(
//!     "echo",
//!     FnHandler::new(|step, _ctx| async move { Ok(json!({ "echoed": step.input })) }),
//! );
//! assert!(registry.contains("echo"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::error::HandlerError;
use crate::workflow::{ExecutionContext, Step};

/// Capability executing one kind of step.
///
/// Implementations may perform arbitrary external I/O. A failure is
/// recorded on the step and propagated by the engine unchanged.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, step: &Step, context: &ExecutionContext) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into a [`StepHandler`].
///
/// The closure receives owned copies of the step and context.
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Step, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(Step, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, step: &Step, context: &ExecutionContext) -> Result<Value, HandlerError> {
        (self.func)(step.clone(), context.clone()).await
    }
}

/// Mapping from step kind to handler.
///
/// Registration is a setup-time operation and takes `&mut self`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl StepHandler + 'static) {
        self.register_arc(kind, Arc::new(handler));
    }

    /// Registers a shared handler for `kind`.
    pub fn register_arc(&mut self, kind: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), handler).is_some() {
            debug!("Replaced handler for step kind '{}'", kind);
        } else {
            debug!("Registered handler for step kind '{}'", kind);
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
