//! Action middleware
//!
//! A middleware wraps every action invocation it accepts. It sees the
//! `ActionContext` and a `Next` handle; calling `next.run()` continues with
//! the rest of the chain and eventually the action body, not calling it
//! short-circuits the action. Entries can be scoped to a model subtree.

mod logging;
mod registry;

pub use logging::{CollectedCall, CollectingMiddleware, LoggingMiddleware};
pub use registry::{MiddlewareDisposer, MiddlewareId, MiddlewareRegistry};

use crate::context::ActionContext;
use crate::error::Result;
use crate::model::Model;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Interceptor for action invocations
pub trait ActionMiddleware: Send + Sync {
    /// Whether this middleware wants to see `ctx`
    fn filter(&self, _ctx: &ActionContext) -> bool {
        true
    }

    /// Handle one invocation, usually by calling `next.run()` once
    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> Result<Value>;

    /// Name used in logs and errors
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The remainder of a middleware chain
pub struct Next<'a> {
    ctx: &'a ActionContext,
    chain: &'a [Arc<dyn ActionMiddleware>],
    body: Box<dyn FnOnce() -> Result<Value> + 'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        ctx: &'a ActionContext,
        chain: &'a [Arc<dyn ActionMiddleware>],
        body: Box<dyn FnOnce() -> Result<Value> + 'a>,
    ) -> Self {
        Self { ctx, chain, body }
    }

    /// Continue with the next middleware, or the action body
    pub fn run(self) -> Result<Value> {
        match self.chain.split_first() {
            Some((first, rest)) => {
                let next = Next {
                    ctx: self.ctx,
                    chain: rest,
                    body: self.body,
                };
                first.handle(self.ctx, next)
            }
            None => (self.body)(),
        }
    }

    /// Number of middlewares still ahead of the body
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("ctx", &self.ctx.id())
            .field("remaining", &self.chain.len())
            .finish()
    }
}

/// Registration record: a middleware and an optional subtree scope
#[derive(Clone)]
pub struct MiddlewareEntry {
    middleware: Arc<dyn ActionMiddleware>,
    scope: Option<Model>,
}

impl MiddlewareEntry {
    pub fn new<M: ActionMiddleware + 'static>(middleware: M) -> Self {
        Self::from_arc(Arc::new(middleware))
    }

    /// Wrap a shared middleware; the `Arc` identity is the registration identity
    pub fn from_arc(middleware: Arc<dyn ActionMiddleware>) -> Self {
        Self {
            middleware,
            scope: None,
        }
    }

    /// Only intercept actions whose target is `root` or lives below it
    pub fn scoped_to(mut self, root: &Model) -> Self {
        self.scope = Some(root.clone());
        self
    }

    pub fn middleware(&self) -> &Arc<dyn ActionMiddleware> {
        &self.middleware
    }

    pub fn scope(&self) -> Option<&Model> {
        self.scope.as_ref()
    }

    pub fn name(&self) -> &'static str {
        self.middleware.name()
    }

    /// Whether this entry takes part in the chain for `ctx`
    pub fn accepts(&self, ctx: &ActionContext) -> bool {
        let in_scope = self
            .scope
            .as_ref()
            .map_or(true, |scope| ctx.target().is_descendant_of(scope));
        in_scope && self.middleware.filter(ctx)
    }

    fn identity(&self) -> *const () {
        Arc::as_ptr(&self.middleware) as *const ()
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("name", &self.name())
            .field("scope", &self.scope)
            .finish()
    }
}

type FilterFn = Box<dyn Fn(&ActionContext) -> bool + Send + Sync>;

/// Middleware built from closures
pub struct FnMiddleware<H> {
    name: &'static str,
    filter: Option<FilterFn>,
    handler: H,
}

impl<H> FnMiddleware<H> {
    /// Only handle contexts accepted by `filter`
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ActionContext) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<H> ActionMiddleware for FnMiddleware<H>
where
    H: Fn(&ActionContext, Next<'_>) -> Result<Value> + Send + Sync,
{
    fn filter(&self, ctx: &ActionContext) -> bool {
        self.filter.as_ref().map_or(true, |f| f(ctx))
    }

    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> Result<Value> {
        (self.handler)(ctx, next)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Build a middleware from a handler closure
pub fn middleware_fn<H>(name: &'static str, handler: H) -> FnMiddleware<H>
where
    H: Fn(&ActionContext, Next<'_>) -> Result<Value> + Send + Sync + 'static,
{
    FnMiddleware {
        name,
        filter: None,
        handler,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::model::ModelClass;
    use parking_lot::Mutex;

    fn ctx() -> ActionContext {
        let class = ModelClass::builder("T").build().unwrap();
        let target = Dispatcher::new().create_model(&class, Value::Null).unwrap();
        ActionContext::new("act", None, target, vec![], None)
    }

    fn tracer(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn ActionMiddleware> {
        Arc::new(middleware_fn(name, move |_, next| {
            log.lock().push(format!("{} in", name));
            let result = next.run();
            log.lock().push(format!("{} out", name));
            result
        }))
    }

    #[test]
    fn test_chain_runs_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![tracer("a", log.clone()), tracer("b", log.clone())];
        let ctx = ctx();

        let body_log = log.clone();
        let next = Next::new(
            &ctx,
            &chain,
            Box::new(move || {
                body_log.lock().push("body".to_string());
                Ok(Value::from(7))
            }),
        );
        assert_eq!(next.remaining(), 2);
        assert_eq!(next.run().unwrap(), Value::from(7));
        assert_eq!(*log.lock(), vec!["a in", "b in", "body", "b out", "a out"]);
    }

    #[test]
    fn test_short_circuit_skips_body() {
        let chain: Vec<Arc<dyn ActionMiddleware>> =
            vec![Arc::new(middleware_fn("stop", |_, _next| Ok(Value::from("stopped"))))];
        let ctx = ctx();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();

        let result = Next::new(
            &ctx,
            &chain,
            Box::new(move || {
                *flag.lock() = true;
                Ok(Value::Null)
            }),
        )
        .run()
        .unwrap();

        assert_eq!(result, Value::from("stopped"));
        assert!(!*ran.lock());
    }

    #[test]
    fn test_entry_filter_and_scope() {
        let ctx = ctx();
        let only_other = MiddlewareEntry::new(
            middleware_fn("other", |_, next| next.run()).with_filter(|c| c.action_name() == "other"),
        );
        assert!(!only_other.accepts(&ctx));
        assert_eq!(only_other.name(), "other");

        let scoped_here = MiddlewareEntry::new(middleware_fn("s", |_, next| next.run())).scoped_to(ctx.target());
        assert!(scoped_here.accepts(&ctx));

        let class = ModelClass::builder("U").build().unwrap();
        let elsewhere = Dispatcher::new().create_model(&class, Value::Null).unwrap();
        let scoped_away = MiddlewareEntry::new(middleware_fn("s", |_, next| next.run())).scoped_to(&elsewhere);
        assert!(!scoped_away.accepts(&ctx));
    }
}
