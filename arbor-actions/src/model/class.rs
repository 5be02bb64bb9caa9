//! Model classes: the method table of a model type
//!
//! A class is built once with `ModelClass::builder` and shared by all of its
//! instances. Each method is registered with its kind, so the dispatcher can
//! ask whether a name is an action, a flow or a plain method without any
//! runtime introspection.

use crate::error::{ActionError, Result};
use crate::flow::FlowScope;
use crate::model::Model;
use crate::special::is_special_action;
use crate::value::Value;
use arbor_types::{MethodKind, ModelType};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Body of an action or plain method
pub type ActionFn = Arc<dyn Fn(&Model, &[Value]) -> Result<Value> + Send + Sync>;

/// Body of a flow: builds the future that runs the flow's steps
pub type FlowFn =
    Arc<dyn Fn(FlowScope, Model, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Method {
    Action(ActionFn),
    Flow(FlowFn),
    Plain(ActionFn),
}

impl Method {
    fn kind(&self) -> MethodKind {
        match self {
            Method::Action(_) => MethodKind::Action,
            Method::Flow(_) => MethodKind::Flow,
            Method::Plain(_) => MethodKind::Plain,
        }
    }
}

/// Query interface for how a method name is dispatched
pub trait ActionTagging {
    /// Kind of the named method, if it exists
    fn method_kind(&self, name: &str) -> Option<MethodKind>;

    fn is_model_action(&self, name: &str) -> bool {
        self.method_kind(name) == Some(MethodKind::Action)
    }

    fn is_model_flow(&self, name: &str) -> bool {
        self.method_kind(name) == Some(MethodKind::Flow)
    }
}

/// Method table and type tag shared by all instances of a model type
pub struct ModelClass {
    model_type: ModelType,
    methods: HashMap<String, Method>,
}

impl ModelClass {
    /// Start building a class with the given type tag
    pub fn builder(model_type: impl Into<ModelType>) -> ModelClassBuilder {
        ModelClassBuilder {
            model_type: model_type.into(),
            methods: HashMap::new(),
            reserved: Vec::new(),
        }
    }

    /// Start building a class that inherits every method of `base`
    ///
    /// Methods registered on the builder override inherited ones.
    pub fn extend(base: &ModelClass, model_type: impl Into<ModelType>) -> ModelClassBuilder {
        ModelClassBuilder {
            model_type: model_type.into(),
            methods: base.methods.clone(),
            reserved: Vec::new(),
        }
    }

    pub fn model_type(&self) -> &ModelType {
        &self.model_type
    }

    /// Names of all methods, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }
}

impl ActionTagging for ModelClass {
    fn method_kind(&self, name: &str) -> Option<MethodKind> {
        self.methods.get(name).map(Method::kind)
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("model_type", &self.model_type)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builder for `ModelClass`
pub struct ModelClassBuilder {
    model_type: ModelType,
    methods: HashMap<String, Method>,
    reserved: Vec<String>,
}

impl ModelClassBuilder {
    /// Register an intercepted action
    pub fn action<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Model, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), Method::Action(Arc::new(body)))
    }

    /// Register a flow
    ///
    /// The body receives a `FlowScope` whose `suspend` marks the points where
    /// the flow yields back to its caller.
    pub fn flow<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(FlowScope, Model, Vec<Value>) -> BoxFuture<'static, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name.into(), Method::Flow(Arc::new(body)))
    }

    /// Register a plain method that bypasses the pipeline
    pub fn method<F>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Model, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), Method::Plain(Arc::new(body)))
    }

    fn insert(mut self, name: String, method: Method) -> Self {
        if is_special_action(&name) {
            self.reserved.push(name);
        } else {
            self.methods.insert(name, method);
        }
        self
    }

    /// Finish the class
    ///
    /// Fails if any registered name collides with a special action.
    pub fn build(self) -> Result<Arc<ModelClass>> {
        if let Some(name) = self.reserved.into_iter().next() {
            return Err(ActionError::ReservedActionName(name));
        }
        Ok(Arc::new(ModelClass {
            model_type: self.model_type,
            methods: self.methods,
        }))
    }
}
