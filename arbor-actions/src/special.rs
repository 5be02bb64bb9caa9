//! Built-in special actions
//!
//! Special actions are provided by the action layer itself rather than by a
//! model class. Their names start with `$$`, which model classes may not use.
//! They run through the middleware chain like any other action, so they are
//! serialized and replayed the same way.

use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use crate::model::{Model, MODEL_ID_KEY, MODEL_TYPE_KEY};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

const SPECIAL_PREFIX: &str = "$$";

/// Whether `name` is reserved for a special action
pub fn is_special_action(name: &str) -> bool {
    name.starts_with(SPECIAL_PREFIX)
}

/// The special actions known to the action layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialAction {
    /// Replace a model's data with a snapshot
    ApplySnapshot,
}

impl SpecialAction {
    pub fn name(&self) -> &'static str {
        match self {
            SpecialAction::ApplySnapshot => "$$applySnapshot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "$$applySnapshot" => Some(SpecialAction::ApplySnapshot),
            _ => None,
        }
    }

    /// Run the special action on `target` with replayed arguments
    pub fn apply(&self, target: &Model, args: &[Value]) -> Result<Value> {
        match self {
            SpecialAction::ApplySnapshot => {
                let snapshot = args
                    .first()
                    .ok_or_else(|| ActionError::InvalidModelData("missing snapshot argument".to_string()))?
                    .to_json()
                    .map_err(|reason| ActionError::InvalidModelData(format!("snapshot is not plain data: {}", reason)))?;
                target.apply_snapshot(snapshot)
            }
        }
    }
}

impl fmt::Display for SpecialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Model {
    /// Replace this model's data with `snapshot`, as the `$$applySnapshot`
    /// action
    ///
    /// Fields missing from the snapshot are removed. Child models whose
    /// `$modelId` matches the snapshot at their position are updated in
    /// place; everything else is replaced by plain data.
    pub fn apply_snapshot(&self, snapshot: serde_json::Value) -> Result<Value> {
        check_identity(self, &snapshot)?;

        let dispatcher = self.dispatcher().clone();
        let parent = dispatcher.current_action_context();
        let ctx = ActionContext::new(
            SpecialAction::ApplySnapshot.name(),
            None,
            self.clone(),
            vec![Value::from_json(snapshot.clone())],
            parent.as_ref(),
        );
        tracing::debug!(ctx = %ctx.id(), target = %self, "applying snapshot");

        dispatcher.run_in_context(&ctx, || {
            reconcile(self, &snapshot)?;
            Ok(Value::Null)
        })
    }
}

fn check_identity(model: &Model, snapshot: &serde_json::Value) -> Result<()> {
    let fields = snapshot
        .as_object()
        .ok_or_else(|| ActionError::InvalidModelData("snapshot must be an object".to_string()))?;

    let type_matches = fields
        .get(MODEL_TYPE_KEY)
        .map_or(true, |t| t.as_str() == Some(model.model_type().as_str()));
    let id_matches = fields
        .get(MODEL_ID_KEY)
        .map_or(true, |id| id.as_str() == Some(model.id().as_str()));

    if type_matches && id_matches {
        Ok(())
    } else {
        Err(ActionError::SnapshotMismatch {
            model_type: model.model_type().clone(),
            model_id: model.id().clone(),
        })
    }
}

fn reconcile(model: &Model, snapshot: &serde_json::Value) -> Result<()> {
    check_identity(model, snapshot)?;
    let Some(fields) = snapshot.as_object() else {
        return Ok(());
    };

    for key in model.keys() {
        if !fields.contains_key(&key) {
            model.remove(&key)?;
        }
    }
    for (key, json) in fields {
        if key == MODEL_TYPE_KEY || key == MODEL_ID_KEY {
            continue;
        }
        let merged = merge(model.get(key), json)?;
        model.set(key, merged)?;
    }
    Ok(())
}

fn same_model(model: &Model, json: &serde_json::Value) -> bool {
    json.get(MODEL_ID_KEY).and_then(|id| id.as_str()) == Some(model.id().as_str())
}

fn merge(current: Option<Value>, json: &serde_json::Value) -> Result<Value> {
    Ok(match (current, json) {
        (Some(Value::Model(child)), _) if same_model(&child, json) => {
            reconcile(&child, json)?;
            Value::Model(child)
        }
        (Some(Value::Object(mut map)), serde_json::Value::Object(fields)) => {
            map.retain(|k, _| fields.contains_key(k));
            for (k, v) in fields {
                let merged = merge(map.remove(k), v)?;
                map.insert(k.clone(), merged);
            }
            Value::Object(map)
        }
        (Some(Value::Array(items)), serde_json::Value::Array(jsons)) => {
            // child models are matched by id, everything else by position
            let mut children: HashMap<&str, &Model> = items
                .iter()
                .filter_map(Value::as_model)
                .map(|m| (m.id().as_str(), m))
                .collect();
            let mut out = Vec::with_capacity(jsons.len());
            for (i, v) in jsons.iter().enumerate() {
                let current = match v.get(MODEL_ID_KEY).and_then(|id| id.as_str()) {
                    Some(id) => children.remove(id).map(|m| Value::Model(m.clone())),
                    None => None,
                };
                out.push(merge(current.or_else(|| items.get(i).cloned()), v)?);
            }
            Value::Array(out)
        }
        (Some(Value::Observable(observable)), _) => {
            let merged = merge(Some(observable.get()), json)?;
            observable.set(merged);
            Value::Observable(observable)
        }
        (_, json) => Value::from_json(json.clone()),
    })
}
