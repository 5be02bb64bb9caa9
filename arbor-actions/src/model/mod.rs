//! Model substrate
//!
//! A `Model` is a handle to a stateful object with a stable type tag and
//! instance id. Models form a tree: a model stored (directly or nested inside
//! objects/arrays) in another model's fields becomes its child, and remembers
//! the edge names leading to it. Writes are guarded by the dispatcher: they
//! are only permitted while an action is running or inside
//! `Dispatcher::run_unprotected`.

mod class;

pub use class::{ActionFn, ActionTagging, FlowFn, ModelClass, ModelClassBuilder};
pub(crate) use class::Method;

use crate::dispatcher::Dispatcher;
use crate::error::{ActionError, Result};
use crate::flow::FlowTask;
use crate::value::{Unrepresentable, Value};
use arbor_types::{MethodKind, ModelId, ModelType};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Snapshot key carrying the model type tag
pub const MODEL_TYPE_KEY: &str = "$modelType";

/// Snapshot key carrying the model instance id
pub const MODEL_ID_KEY: &str = "$modelId";

/// Handle to a model instance
///
/// Cloning is cheap and yields another handle to the same instance.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

struct ModelInner {
    id: ModelId,
    class: Arc<ModelClass>,
    dispatcher: Dispatcher,
    state: RwLock<ModelState>,
}

#[derive(Default)]
struct ModelState {
    data: BTreeMap<String, Value>,
    parent: Option<ParentEdge>,
}

/// Ownership edge from a model to its parent
struct ParentEdge {
    parent: Weak<ModelInner>,
    path: Vec<String>,
}

impl Model {
    pub(crate) fn create(
        dispatcher: &Dispatcher,
        class: Arc<ModelClass>,
        data: Value,
        id: Option<ModelId>,
    ) -> Result<Model> {
        let fields = match data {
            Value::Object(map) => map,
            Value::Null => BTreeMap::new(),
            other => {
                return Err(ActionError::InvalidModelData(format!(
                    "expected an object, got {:?}",
                    other
                )))
            }
        };

        let model = Model {
            inner: Arc::new(ModelInner {
                id: id.unwrap_or_default(),
                class,
                dispatcher: dispatcher.clone(),
                state: RwLock::new(ModelState::default()),
            }),
        };

        let mut incoming = Vec::new();
        for (key, value) in &fields {
            incoming.extend(models_in(value, &[key.clone()]));
        }
        model.check_attachable(&incoming, &[])?;

        model.inner.state.write().data = fields;
        for (child, edge) in incoming {
            child.attach_to(&model, edge);
        }

        tracing::trace!(model = %model, "model created");
        Ok(model)
    }

    pub fn id(&self) -> &ModelId {
        &self.inner.id
    }

    pub fn model_type(&self) -> &ModelType {
        self.inner.class.model_type()
    }

    pub fn class(&self) -> &Arc<ModelClass> {
        &self.inner.class
    }

    /// The dispatcher this model reports its actions to
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Whether both handles refer to the same instance
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---------------------------------------------------------------------
    // Reads

    /// Read a top-level field
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.read().data.get(key).cloned()
    }

    /// Read a nested value, following object keys, array indices and child
    /// models
    pub fn get_in(&self, path: &[&str]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.get(first)?;
        for segment in rest {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Names of the top-level fields
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.read().data.keys().cloned().collect()
    }

    // ---------------------------------------------------------------------
    // Writes

    /// Write a top-level field
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_in(&[key], value)
    }

    /// Write a nested value inside this model's own data
    ///
    /// Intermediate objects and arrays must exist; the last segment may name
    /// a new object key or the index one past the end of an array.
    pub fn set_in(&self, path: &[&str], value: Value) -> Result<()> {
        let full: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| ActionError::PathNotFound { path: Vec::new() })?;

        self.inner.dispatcher.check_mutation(self)?;

        let incoming = models_in(&value, &full);
        self.check_attachable(&incoming, &full)?;

        let old = {
            let mut state = self.inner.state.write();
            let slot = slot_mut(&mut state.data, first, rest, &full)?;
            std::mem::replace(slot, value)
        };

        self.reparent(&old, incoming, &full);
        tracing::trace!(model = %self, path = ?full, "model field written");
        Ok(())
    }

    /// Remove a top-level field, detaching any models it held
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.inner.dispatcher.check_mutation(self)?;
        let old = self.inner.state.write().data.remove(key);
        if let Some(old) = &old {
            self.reparent(old, Vec::new(), &[key.to_string()]);
        }
        Ok(old)
    }

    fn reparent(&self, old: &Value, incoming: Vec<(Model, Vec<String>)>, base: &[String]) {
        for (child, _) in models_in(old, base) {
            if !incoming.iter().any(|(m, _)| m.ptr_eq(&child)) {
                child.detach_from(self);
            }
        }
        for (child, edge) in incoming {
            child.attach_to(self, edge);
        }
    }

    /// Check that every incoming child may live at its new edge
    ///
    /// A child already owned by this model may move as long as its current
    /// edge lies under `base`, the path being replaced.
    fn check_attachable(&self, incoming: &[(Model, Vec<String>)], base: &[String]) -> Result<()> {
        for (i, (child, _)) in incoming.iter().enumerate() {
            let duplicate = incoming[..i].iter().any(|(m, _)| m.ptr_eq(child));
            if duplicate || self.is_descendant_of(child) {
                return Err(ActionError::AlreadyAttached {
                    model_id: child.id().clone(),
                });
            }
            if let Some((parent, at)) = child.parent_edge() {
                if !(parent.ptr_eq(self) && at.starts_with(base)) {
                    return Err(ActionError::AlreadyAttached {
                        model_id: child.id().clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn attach_to(&self, parent: &Model, path: Vec<String>) {
        self.inner.state.write().parent = Some(ParentEdge {
            parent: Arc::downgrade(&parent.inner),
            path,
        });
    }

    fn detach_from(&self, parent: &Model) {
        let mut state = self.inner.state.write();
        let owned_by_parent = state
            .parent
            .as_ref()
            .and_then(|edge| edge.parent.upgrade())
            .map_or(false, |p| Arc::ptr_eq(&p, &parent.inner));
        if owned_by_parent {
            state.parent = None;
        }
    }

    // ---------------------------------------------------------------------
    // Tree navigation

    /// The owning model and the edges from it to this model
    pub fn parent_edge(&self) -> Option<(Model, Vec<String>)> {
        let state = self.inner.state.read();
        let edge = state.parent.as_ref()?;
        let parent = edge.parent.upgrade()?;
        Some((Model { inner: parent }, edge.path.clone()))
    }

    pub fn parent(&self) -> Option<Model> {
        self.parent_edge().map(|(parent, _)| parent)
    }

    /// Top-most ancestor (this model if it has no parent)
    pub fn root(&self) -> Model {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Whether this model is `ancestor` or lives somewhere beneath it
    pub fn is_descendant_of(&self, ancestor: &Model) -> bool {
        let mut current = Some(self.clone());
        while let Some(model) = current {
            if model.ptr_eq(ancestor) {
                return true;
            }
            current = model.parent();
        }
        false
    }

    /// Edges from `root` down to this model, or None if it is not under `root`
    pub fn path_from(&self, root: &Model) -> Option<Vec<String>> {
        let mut segments: Vec<Vec<String>> = Vec::new();
        let mut current = self.clone();
        loop {
            if current.ptr_eq(root) {
                return Some(segments.into_iter().rev().flatten().collect());
            }
            let (parent, edge) = current.parent_edge()?;
            segments.push(edge);
            current = parent;
        }
    }

    /// Find the model at `path` below this one
    pub fn resolve(&self, path: &[String]) -> Option<Model> {
        let mut current = Value::Model(self.clone());
        for segment in path {
            current = current.child(segment)?;
        }
        match current {
            Value::Model(model) => Some(model),
            _ => None,
        }
    }

    // ---------------------------------------------------------------------
    // Snapshots

    /// Plain JSON image of this model and its children
    pub fn snapshot(&self) -> std::result::Result<serde_json::Value, Unrepresentable> {
        self.snapshot_guarded(&mut Vec::new())
    }

    pub(crate) fn snapshot_guarded(
        &self,
        seen: &mut Vec<*const ()>,
    ) -> std::result::Result<serde_json::Value, Unrepresentable> {
        let key = Arc::as_ptr(&self.inner) as *const ();
        if seen.contains(&key) {
            return Err(Unrepresentable::Cycle);
        }
        seen.push(key);

        let data = self.inner.state.read().data.clone();
        let mut out = serde_json::Map::new();
        out.insert(MODEL_TYPE_KEY.to_string(), self.model_type().as_str().into());
        out.insert(MODEL_ID_KEY.to_string(), self.id().as_str().into());
        let mut result = Ok(());
        for (k, v) in &data {
            match v.to_json_guarded(seen) {
                Ok(json) => {
                    out.insert(k.clone(), json);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        seen.pop();
        result.map(|_| serde_json::Value::Object(out))
    }

    // ---------------------------------------------------------------------
    // Dispatch

    /// Invoke a method by name
    ///
    /// Actions run through the dispatcher's pipeline; plain methods run
    /// directly. Flows must be started with `call_flow`.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match self.lookup(name)? {
            Method::Action(body) => self.inner.dispatcher.run_action(self, name, args, body),
            Method::Plain(body) => body(self, &args),
            Method::Flow(_) => Err(ActionError::WrongMethodKind {
                action: name.to_string(),
                expected: MethodKind::Action,
                actual: MethodKind::Flow,
            }),
        }
    }

    /// Start a flow by name
    ///
    /// The spawn step runs before this returns; the remaining steps run as
    /// the returned task is polled.
    pub fn call_flow(&self, name: &str, args: Vec<Value>) -> Result<FlowTask> {
        match self.lookup(name)? {
            Method::Flow(body) => Ok(FlowTask::spawn(self, name, args, body)),
            other => Err(ActionError::WrongMethodKind {
                action: name.to_string(),
                expected: MethodKind::Flow,
                actual: match other {
                    Method::Action(_) => MethodKind::Action,
                    _ => MethodKind::Plain,
                },
            }),
        }
    }

    fn lookup(&self, name: &str) -> Result<Method> {
        self.inner
            .class
            .method(name)
            .cloned()
            .ok_or_else(|| ActionError::UnknownAction {
                model_type: self.model_type().clone(),
                action: name.to_string(),
            })
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_type(), self.id())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model({})", self)
    }
}

fn models_in(value: &Value, base: &[String]) -> Vec<(Model, Vec<String>)> {
    let mut found = Vec::new();
    let mut prefix = base.to_vec();
    value.for_each_model(&mut prefix, &mut |model, edge| {
        found.push((model.clone(), edge.to_vec()));
    });
    found
}

fn slot_mut<'a>(
    data: &'a mut BTreeMap<String, Value>,
    first: &str,
    rest: &[&str],
    full: &[String],
) -> Result<&'a mut Value> {
    let not_found = || ActionError::PathNotFound {
        path: full.to_vec(),
    };

    if rest.is_empty() {
        return Ok(data.entry(first.to_string()).or_insert(Value::Null));
    }

    let mut current = data.get_mut(first).ok_or_else(not_found)?;
    for (i, segment) in rest.iter().enumerate() {
        let last = i + 1 == rest.len();
        current = match current {
            Value::Object(map) => {
                if last {
                    map.entry(segment.to_string()).or_insert(Value::Null)
                } else {
                    map.get_mut(*segment).ok_or_else(not_found)?
                }
            }
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| not_found())?;
                if last && index == items.len() {
                    items.push(Value::Null);
                }
                items.get_mut(index).ok_or_else(not_found)?
            }
            _ => return Err(not_found()),
        };
    }
    Ok(current)
}
