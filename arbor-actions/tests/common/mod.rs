//! Shared fixtures: a root model `P` owning a child `P2` at `data.p2`

#![allow(dead_code)]

use arbor_actions::{ActionContext, ActionError, Dispatcher, Model, ModelClass, ModelId, SerializableActionCall, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn arg_i64(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or(0)
}

fn add_to(model: &Model, field: &str, n: i64) -> arbor_actions::Result<Value> {
    let current = model.get_in(&["data", field]).and_then(|v| v.as_i64()).unwrap_or(0);
    model.set_in(&["data", field], Value::from(current + n))?;
    Ok(Value::from(current + n))
}

pub fn p2_class() -> Arc<ModelClass> {
    ModelClass::builder("P2")
        .action("addY", |m, args| add_to(m, "y", arg_i64(args, 0)))
        .build()
        .unwrap()
}

pub fn p_class() -> Arc<ModelClass> {
    ModelClass::builder("P")
        .action("addX", |m, args| add_to(m, "x", arg_i64(args, 0)))
        .action("other", |_, _| Ok(Value::Null))
        .action("addXY", |m, args| {
            m.call("addX", vec![Value::from(arg_i64(args, 0))])?;
            child_p2(m)?.call("addY", vec![Value::from(arg_i64(args, 1))])?;
            Ok(Value::from(arg_i64(args, 0) + arg_i64(args, 1)))
        })
        .method("sum", |m, _| {
            let x = m.get_in(&["data", "x"]).and_then(|v| v.as_i64()).unwrap_or(0);
            let y = child_p2(m)?.get_in(&["data", "y"]).and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Value::from(x + y))
        })
        .build()
        .unwrap()
}

pub fn child_p2(p: &Model) -> arbor_actions::Result<Model> {
    p.get_in(&["data", "p2"])
        .and_then(|v| v.as_model().cloned())
        .ok_or_else(|| ActionError::msg("p2 is missing"))
}

/// Create a `P` with a fresh `P2` child
pub fn new_p(dispatcher: &Dispatcher) -> Model {
    let p2 = dispatcher
        .create_model(&p2_class(), Value::object([("data", Value::object([("y", Value::from(0))]))]))
        .unwrap();
    dispatcher
        .create_model(
            &p_class(),
            Value::object([(
                "data",
                Value::object([("p2", Value::from(p2)), ("x", Value::from(0))]),
            )]),
        )
        .unwrap()
}

/// Create a `P` tree whose ids match `original`'s
pub fn replica_of(dispatcher: &Dispatcher, original: &Model) -> Model {
    let original_p2 = child_p2(original).unwrap();
    let p2 = dispatcher
        .create_model_with_id(
            &p2_class(),
            ModelId::from_string(original_p2.id().as_str()),
            Value::object([("data", Value::object([("y", Value::from(0))]))]),
        )
        .unwrap();
    dispatcher
        .create_model_with_id(
            &p_class(),
            ModelId::from_string(original.id().as_str()),
            Value::object([(
                "data",
                Value::object([("p2", Value::from(p2)), ("x", Value::from(0))]),
            )]),
        )
        .unwrap()
}

pub fn read_i64(model: &Model, path: &[&str]) -> i64 {
    model.get_in(path).and_then(|v| v.as_i64()).unwrap_or(0)
}

/// Collects serialized calls
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<SerializableActionCall>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> impl Fn(SerializableActionCall, &ActionContext) + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |call: SerializableActionCall, _ctx: &ActionContext| calls.lock().push(call)
    }

    pub fn calls(&self) -> Vec<SerializableActionCall> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}
