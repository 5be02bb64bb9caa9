//! The dispatcher: context stack, middleware registry and mutation guard
//!
//! Every model is created through a `Dispatcher` and reports its actions to
//! it. Tests and embedders create as many independent dispatchers as they
//! need; nothing here is process-global.

use crate::config::DispatcherConfig;
use crate::context::{ActionContext, ContextStack};
use crate::error::{ActionError, Result};
use crate::middleware::{LoggingMiddleware, MiddlewareDisposer, MiddlewareEntry, MiddlewareRegistry, Next};
use crate::model::{ActionFn, Model, ModelClass};
use crate::protection::Exemption;
use crate::value::Value;
use arbor_types::ModelId;
use std::fmt;
use std::sync::Arc;

/// Handle to a shared dispatcher; cloning yields another handle
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    stack: ContextStack,
    registry: Arc<MiddlewareRegistry>,
    exemption: Exemption,
    /// Keeps the built-in logging middleware registered
    _logging: Option<MiddlewareDisposer>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let registry = Arc::new(MiddlewareRegistry::new());
        let logging = if config.log_actions {
            registry
                .register(MiddlewareEntry::new(LoggingMiddleware::new("action")))
                .ok()
        } else {
            None
        };

        tracing::debug!(?config, "dispatcher created");
        Self {
            inner: Arc::new(DispatcherInner {
                stack: ContextStack::new(config.max_depth),
                config,
                registry,
                exemption: Exemption::default(),
                _logging: logging,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Create a model of `class` owned by this dispatcher
    pub fn create_model(&self, class: &Arc<ModelClass>, data: Value) -> Result<Model> {
        Model::create(self, Arc::clone(class), data, None)
    }

    /// Create a model with a known id, e.g. a replica of another tree
    pub fn create_model_with_id(&self, class: &Arc<ModelClass>, id: ModelId, data: Value) -> Result<Model> {
        Model::create(self, Arc::clone(class), data, Some(id))
    }

    /// The innermost running action context
    pub fn current_action_context(&self) -> Option<ActionContext> {
        self.inner.stack.current()
    }

    pub fn stack_depth(&self) -> usize {
        self.inner.stack.depth()
    }

    // ---------------------------------------------------------------------
    // Middleware

    /// Register a middleware; it runs inside every middleware registered
    /// before it
    pub fn add_middleware(&self, entry: MiddlewareEntry) -> Result<MiddlewareDisposer> {
        self.inner.registry.register(entry)
    }

    pub fn middleware_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Registered middleware names, outermost first
    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.inner.registry.names()
    }

    // ---------------------------------------------------------------------
    // Protection

    /// Run `f` with model writes permitted outside of any action
    ///
    /// No context is pushed, so middleware does not see anything `f` does
    /// directly. Nested calls are fine.
    pub fn run_unprotected<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.exemption.enter();
        f()
    }

    pub fn is_unprotected(&self) -> bool {
        self.inner.exemption.is_active()
    }

    pub(crate) fn check_mutation(&self, model: &Model) -> Result<()> {
        if !self.inner.config.enforce_protection
            || self.inner.exemption.is_active()
            || !self.inner.stack.is_empty()
        {
            return Ok(());
        }
        tracing::warn!(model = %model, "write outside of an action rejected");
        Err(ActionError::MutationOutsideAction {
            model_type: model.model_type().clone(),
            model_id: model.id().clone(),
        })
    }

    // ---------------------------------------------------------------------
    // Dispatch

    /// Run `body` as the innermost call of the middleware chain for `ctx`
    ///
    /// `ctx` is pushed before the chain is built and popped on every exit.
    pub(crate) fn run_in_context(
        &self,
        ctx: &ActionContext,
        body: impl FnOnce() -> Result<Value>,
    ) -> Result<Value> {
        let frame = self.inner.stack.enter(ctx.clone())?;
        let chain = self.inner.registry.chain_for(ctx);
        tracing::trace!(ctx = %ctx.id(), action = ctx.action_name(), middlewares = chain.len(), "dispatch");

        let result = Next::new(ctx, &chain, Box::new(body)).run();
        frame.exit()?;
        result
    }

    /// Invoke a synchronous action on `target`
    pub(crate) fn run_action(&self, target: &Model, name: &str, args: Vec<Value>, body: ActionFn) -> Result<Value> {
        let parent = self.current_action_context();
        let ctx = ActionContext::new(name, None, target.clone(), args, parent.as_ref());
        tracing::debug!(
            ctx = %ctx.id(),
            target = %target,
            action = name,
            parent = ?parent.as_ref().map(ActionContext::id),
            "action"
        );

        self.run_in_context(&ctx, || body(ctx.target(), ctx.args()))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("depth", &self.inner.stack.depth())
            .field("middlewares", &self.inner.registry.names())
            .finish()
    }
}
