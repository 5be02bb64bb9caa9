//! Action contexts
//!
//! An `ActionContext` records one action invocation or one flow step:
//! which action, against which model, with which arguments, and which
//! context was running when it started. Contexts link to their parent and
//! root weakly, so a finished context never keeps its ancestors alive.

mod stack;

pub use stack::{ContextStack, StackFrame};

use crate::model::Model;
use crate::value::Value;
use arbor_types::{ActionContextActionType, ActionContextAsyncStepType, ContextId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Record of one action call or flow step
#[derive(Clone)]
pub struct ActionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    action_name: String,
    async_step_type: Option<ActionContextAsyncStepType>,
    target: Model,
    args: Vec<Value>,
    parent: Option<Weak<ContextInner>>,
    /// None when this context is its own root
    root: Option<Weak<ContextInner>>,
    data: Mutex<HashMap<String, Value>>,
}

impl ActionContext {
    /// Create a context; `step` is None for synchronous actions
    pub(crate) fn new(
        action_name: impl Into<String>,
        step: Option<ActionContextAsyncStepType>,
        target: Model,
        args: Vec<Value>,
        parent: Option<&ActionContext>,
    ) -> Self {
        let root = parent.map(|p| match &p.inner.root {
            Some(root) => root.clone(),
            None => Arc::downgrade(&p.inner),
        });

        Self {
            inner: Arc::new(ContextInner {
                id: ContextId::next(),
                action_name: action_name.into(),
                async_step_type: step,
                target,
                args,
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                root,
                data: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn action_name(&self) -> &str {
        &self.inner.action_name
    }

    pub fn action_type(&self) -> ActionContextActionType {
        match self.inner.async_step_type {
            Some(_) => ActionContextActionType::Async,
            None => ActionContextActionType::Sync,
        }
    }

    /// Flow step this context describes; None for synchronous actions
    pub fn async_step_type(&self) -> Option<ActionContextAsyncStepType> {
        self.inner.async_step_type
    }

    /// The model the action runs against
    pub fn target(&self) -> &Model {
        &self.inner.target
    }

    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    /// The context that was current when this one started, while it is alive
    pub fn parent_context(&self) -> Option<ActionContext> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ActionContext { inner })
    }

    /// Whether this context was started with no current context
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Top-most ancestor, or this context if it has no parent
    ///
    /// Falls back to this context if the root was already dropped.
    pub fn root_context(&self) -> ActionContext {
        self.inner
            .root
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| ActionContext { inner })
            .unwrap_or_else(|| self.clone())
    }

    /// Whether both handles refer to the same context
    pub fn ptr_eq(&self, other: &ActionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach middleware data to this invocation
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.inner.data.lock().insert(key.into(), value);
    }

    pub fn data(&self, key: &str) -> Option<Value> {
        self.inner.data.lock().get(key).cloned()
    }

    pub fn remove_data(&self, key: &str) -> Option<Value> {
        self.inner.data.lock().remove(key)
    }

    /// Copy of all middleware data
    pub fn data_entries(&self) -> HashMap<String, Value> {
        self.inner.data.lock().clone()
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ActionContext");
        s.field("id", &self.inner.id)
            .field("name", &self.inner.action_name)
            .field("type", &self.action_type());
        if let Some(step) = self.inner.async_step_type {
            s.field("step", &step);
        }
        s.field("target", &self.inner.target)
            .field("args", &self.inner.args)
            .field("parent", &self.parent_context().map(|p| p.id()))
            .finish()
    }
}
