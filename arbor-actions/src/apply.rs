//! Programmatic action invocation (replay)
//!
//! An `ActionCall` names an action, its arguments and where its target lives
//! relative to a root. Applying it resolves the target and runs the action
//! through the same pipeline as a direct call, so middleware (including a
//! serializer on the replica) sees nothing different.

use crate::error::{ActionError, Result};
use crate::flow::FlowTask;
use crate::model::Model;
use crate::special::SpecialAction;
use crate::value::Value;
use arbor_types::SerializableActionCall;

/// An action invocation addressed by path
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub action_name: String,
    pub args: Vec<Value>,
    pub target_path: Vec<String>,
}

impl ActionCall {
    /// Call `action_name` on the root itself
    pub fn new(action_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            action_name: action_name.into(),
            args,
            target_path: Vec::new(),
        }
    }

    /// Address a model below the root
    pub fn at_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Rebuild a call from its wire record
    ///
    /// Arguments come back as plain data; models passed by snapshot arrive as
    /// objects.
    pub fn from_serialized(call: &SerializableActionCall) -> Self {
        Self {
            action_name: call.name.clone(),
            args: call.args.iter().cloned().map(Value::from_json).collect(),
            target_path: call.path.clone(),
        }
    }

    fn resolve(&self, root: &Model) -> Result<Model> {
        root.resolve(&self.target_path)
            .ok_or_else(|| ActionError::PathNotFound {
                path: self.target_path.clone(),
            })
    }
}

impl From<SerializableActionCall> for ActionCall {
    fn from(call: SerializableActionCall) -> Self {
        ActionCall::from_serialized(&call)
    }
}

/// Run `call` against the model it addresses below `root`
///
/// Special actions such as `$$applySnapshot` are routed to their built-in
/// implementation.
pub fn apply_action(root: &Model, call: &ActionCall) -> Result<Value> {
    let target = call.resolve(root)?;
    tracing::debug!(root = %root, target = %target, action = %call.action_name, "applying action");

    match SpecialAction::from_name(&call.action_name) {
        Some(special) => special.apply(&target, &call.args),
        None => target.call(&call.action_name, call.args.clone()),
    }
}

/// Start the flow `call` addresses below `root`
pub fn apply_flow_action(root: &Model, call: &ActionCall) -> Result<FlowTask> {
    let target = call.resolve(root)?;
    tracing::debug!(root = %root, target = %target, action = %call.action_name, "applying flow");
    target.call_flow(&call.action_name, call.args.clone())
}
