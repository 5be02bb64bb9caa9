use super::{ActionMiddleware, Next};
use crate::context::ActionContext;
use crate::error::Result;
use crate::value::Value;
use arbor_types::ActionContextAsyncStepType;
use parking_lot::Mutex;

/// A middleware that logs every action it sees
pub struct LoggingMiddleware {
    prefix: String,
}

impl LoggingMiddleware {
    /// Create a new logging middleware with the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ActionMiddleware for LoggingMiddleware {
    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> Result<Value> {
        tracing::info!(
            "{} {} .{}() step={:?} args={:?}",
            self.prefix,
            ctx.target(),
            ctx.action_name(),
            ctx.async_step_type(),
            ctx.args()
        );
        let result = next.run();
        if let Err(err) = &result {
            tracing::info!("{} .{}() failed: {}", self.prefix, ctx.action_name(), err);
        }
        result
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

/// One invocation seen by `CollectingMiddleware`
#[derive(Debug, Clone)]
pub struct CollectedCall {
    pub context: ActionContext,
    pub step: Option<ActionContextAsyncStepType>,
    pub succeeded: bool,
}

/// A middleware that records the contexts it sees, for tests
#[derive(Default)]
pub struct CollectingMiddleware {
    calls: Mutex<Vec<CollectedCall>>,
}

impl CollectingMiddleware {
    /// Create a new collecting middleware
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything seen so far, in completion order
    pub fn calls(&self) -> Vec<CollectedCall> {
        self.calls.lock().clone()
    }

    /// Action names seen so far, in completion order
    pub fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| c.context.action_name().to_string())
            .collect()
    }

    /// Clear all collected data
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl ActionMiddleware for CollectingMiddleware {
    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> Result<Value> {
        let result = next.run();
        self.calls.lock().push(CollectedCall {
            context: ctx.clone(),
            step: ctx.async_step_type(),
            succeeded: result.is_ok(),
        });
        result
    }

    fn name(&self) -> &'static str {
        "CollectingMiddleware"
    }
}
