//! Action call serializer
//!
//! `action_serializer_middleware` turns every action running under a root
//! model into a `SerializableActionCall`: the action name, the path from the
//! root to the target and the arguments as plain JSON. The record is handed
//! to a consumer before the action body runs, so a replica can replay calls
//! in the order they started.

use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::middleware::{ActionMiddleware, MiddlewareEntry, Next};
use crate::model::Model;
use crate::value::Value;
use arbor_types::{ActionContextAsyncStepType, SerializableActionCall};
use std::fmt;
use std::sync::Arc;

/// Replacement for an argument that has no JSON form
///
/// Receives the context, the argument index and the argument. Returning an
/// error aborts the action.
pub type UnserializablePolicy =
    Arc<dyn Fn(&ActionContext, usize, &Value) -> Result<serde_json::Value> + Send + Sync>;

/// Settings for `action_serializer_middleware`
#[derive(Clone)]
pub struct ActionSerializerConfig {
    model: Model,
    on_unserializable_argument: Option<UnserializablePolicy>,
    include_nested: bool,
}

impl ActionSerializerConfig {
    /// Serialize actions running on `model` or anywhere below it
    pub fn new(model: &Model) -> Self {
        Self {
            model: model.clone(),
            on_unserializable_argument: None,
            include_nested: false,
        }
    }

    /// Substitute unserializable arguments instead of failing the call
    pub fn on_unserializable_argument<F>(mut self, policy: F) -> Self
    where
        F: Fn(&ActionContext, usize, &Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.on_unserializable_argument = Some(Arc::new(policy));
        self
    }

    /// Also emit actions called from within other actions of the same tree
    pub fn include_nested(mut self, include: bool) -> Self {
        self.include_nested = include;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}

impl fmt::Debug for ActionSerializerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSerializerConfig")
            .field("model", &self.model)
            .field("has_policy", &self.on_unserializable_argument.is_some())
            .field("include_nested", &self.include_nested)
            .finish()
    }
}

/// Build the serializable record for `ctx` relative to `root`
///
/// Returns `Ok(None)` when the target is not under `root`.
pub fn serialize_action_call(
    ctx: &ActionContext,
    root: &Model,
    policy: Option<&UnserializablePolicy>,
) -> Result<Option<SerializableActionCall>> {
    let Some(path) = ctx.target().path_from(root) else {
        return Ok(None);
    };

    let mut args = Vec::with_capacity(ctx.args().len());
    for (index, arg) in ctx.args().iter().enumerate() {
        let json = match arg.to_json() {
            Ok(json) => json,
            Err(reason) => match policy {
                Some(policy) => policy(ctx, index, arg)?,
                None => {
                    tracing::debug!(action = ctx.action_name(), index, %reason, "unserializable argument");
                    return Err(ActionError::UnserializableArgument {
                        action: ctx.action_name().to_string(),
                        index,
                    });
                }
            },
        };
        args.push(json);
    }

    Ok(Some(SerializableActionCall::new(ctx.action_name(), path, args)))
}

struct ActionSerializer<F> {
    config: ActionSerializerConfig,
    on_serialized: F,
}

impl<F> ActionSerializer<F> {
    /// Whether `ctx` was started from outside the serialized tree
    fn is_top_level(&self, ctx: &ActionContext) -> bool {
        match ctx.parent_context() {
            None => true,
            Some(parent) => !parent.target().is_descendant_of(&self.config.model),
        }
    }
}

impl<F> ActionMiddleware for ActionSerializer<F>
where
    F: Fn(SerializableActionCall, &ActionContext) + Send + Sync,
{
    fn filter(&self, ctx: &ActionContext) -> bool {
        // flows are recorded once, when they are spawned
        let starts_call = matches!(ctx.async_step_type(), None | Some(ActionContextAsyncStepType::Spawn));
        starts_call && (self.config.include_nested || self.is_top_level(ctx))
    }

    fn handle(&self, ctx: &ActionContext, next: Next<'_>) -> Result<Value> {
        let policy = self.config.on_unserializable_argument.as_ref();
        match serialize_action_call(ctx, &self.config.model, policy)? {
            Some(call) => {
                tracing::trace!(action = %call.name, path = ?call.path, "action serialized");
                (self.on_serialized)(call, ctx);
            }
            None => {
                tracing::debug!(
                    action = ctx.action_name(),
                    target = %ctx.target(),
                    root = %self.config.model,
                    "target is not under the serializer root"
                );
            }
        }
        next.run()
    }

    fn name(&self) -> &'static str {
        "ActionSerializer"
    }
}

/// Middleware entry that reports serialized action calls to `on_serialized`
///
/// The entry is scoped to the config's model; register it with
/// `Dispatcher::add_middleware`.
pub fn action_serializer_middleware<F>(config: ActionSerializerConfig, on_serialized: F) -> MiddlewareEntry
where
    F: Fn(SerializableActionCall, &ActionContext) + Send + Sync + 'static,
{
    let root = config.model.clone();
    MiddlewareEntry::new(ActionSerializer { config, on_serialized }).scoped_to(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::model::ModelClass;
    use serde_json::json;

    fn tree() -> (Dispatcher, Model, Model) {
        let dispatcher = Dispatcher::new();
        let child_class = ModelClass::builder("Child").build().unwrap();
        let root_class = ModelClass::builder("Root").build().unwrap();
        let child = dispatcher.create_model(&child_class, Value::Null).unwrap();
        let root = dispatcher
            .create_model(&root_class, Value::object([("kids", Value::array([Value::from(child.clone())]))]))
            .unwrap();
        (dispatcher, root, child)
    }

    #[test]
    fn test_serialize_child_call() {
        let (_dispatcher, root, child) = tree();
        let ctx = ActionContext::new("poke", None, child, vec![Value::from(1), Value::from("a")], None);

        let call = serialize_action_call(&ctx, &root, None).unwrap().unwrap();
        assert_eq!(call.name, "poke");
        assert_eq!(call.path, vec!["kids", "0"]);
        assert_eq!(call.args, vec![json!(1), json!("a")]);
    }

    #[test]
    fn test_target_outside_root_is_skipped() {
        let (_dispatcher, _root, child) = tree();
        let (_other_dispatcher, other_root, _) = tree();
        let ctx = ActionContext::new("poke", None, child, vec![], None);
        assert!(serialize_action_call(&ctx, &other_root, None).unwrap().is_none());
    }

    #[test]
    fn test_policy_substitutes_arguments() {
        let (_dispatcher, root, _) = tree();
        let ctx = ActionContext::new("poke", None, root.clone(), vec![Value::opaque(5u8), Value::from(f64::NAN)], None);

        let err = serialize_action_call(&ctx, &root, None).unwrap_err();
        assert!(matches!(err, ActionError::UnserializableArgument { index: 0, .. }));

        let config = ActionSerializerConfig::new(&root)
            .on_unserializable_argument(|_, index, _| Ok(json!({ "placeholder": index })));
        let policy = config.on_unserializable_argument.as_ref();
        let call = serialize_action_call(&ctx, &root, policy).unwrap().unwrap();
        assert_eq!(call.args, vec![json!({"placeholder": 0}), json!({"placeholder": 1})]);
    }
}
