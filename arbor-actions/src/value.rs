//! Values stored in models and passed to actions
//!
//! `Value` is the currency of the substrate: model fields hold values, and
//! action arguments are values. Most variants are plain data that map onto
//! JSON; `Model`, `Observable` and `Opaque` are live handles.

use crate::model::Model;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A value held by a model field or passed as an action argument
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// A child model (or a reference to one, when passed as an argument)
    Model(Model),
    /// A shared mutable wrapper around another value
    Observable(Observable),
    /// An arbitrary host object with no data representation
    Opaque(Opaque),
}

/// Why a value has no JSON representation
#[derive(Debug, Clone, PartialEq)]
pub enum Unrepresentable {
    /// An opaque host object of the named type
    Opaque(&'static str),
    /// NaN or an infinity
    NonFiniteFloat(f64),
    /// An observable or model that (transitively) contains itself
    Cycle,
}

impl fmt::Display for Unrepresentable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unrepresentable::Opaque(type_name) => write!(f, "opaque value of type {}", type_name),
            Unrepresentable::NonFiniteFloat(v) => write!(f, "non-finite number {}", v),
            Unrepresentable::Cycle => write!(f, "cyclic structure"),
        }
    }
}

impl Value {
    /// Build an object value from key/value pairs
    pub fn object<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an array value
    pub fn array<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Array(items.into_iter().collect())
    }

    /// Wrap a value in a fresh observable
    pub fn observable(inner: Value) -> Value {
        Value::Observable(Observable::new(inner))
    }

    /// Wrap a host object
    pub fn opaque<T: Any + Send + Sync>(inner: T) -> Value {
        Value::Opaque(Opaque::new(inner))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Observable(o) => o.get().as_bool(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Observable(o) => o.get().as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Observable(o) => o.get().as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Value::Model(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a child by edge name: object key or array index
    pub fn child(&self, segment: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.get(segment).cloned(),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            Value::Observable(o) => o.get().child(segment),
            Value::Model(m) => m.get(segment),
            _ => None,
        }
    }

    /// Convert to plain JSON, unwrapping observables and snapshotting models
    pub fn to_json(&self) -> Result<serde_json::Value, Unrepresentable> {
        self.to_json_guarded(&mut Vec::new())
    }

    pub(crate) fn to_json_guarded(
        &self,
        seen: &mut Vec<*const ()>,
    ) -> Result<serde_json::Value, Unrepresentable> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(Unrepresentable::NonFiniteFloat(*f))?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json_guarded(seen))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json_guarded(seen)?);
                }
                serde_json::Value::Object(out)
            }
            Value::Model(m) => m.snapshot_guarded(seen)?,
            Value::Observable(o) => {
                let key = o.addr();
                if seen.contains(&key) {
                    return Err(Unrepresentable::Cycle);
                }
                seen.push(key);
                // Clone out so the lock is not held while recursing.
                let inner = o.get();
                let result = inner.to_json_guarded(seen);
                seen.pop();
                result?
            }
            Value::Opaque(o) => return Err(Unrepresentable::Opaque(o.type_name())),
        })
    }

    /// Build a plain value from JSON
    ///
    /// Integers outside the `i64` range become the nearest `Float`, so
    /// values above `i64::MAX` do not survive a replay exactly.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Visit every model directly reachable from this value, with the edges
    /// leading to it. Does not descend into the models themselves.
    pub(crate) fn for_each_model(&self, prefix: &mut Vec<String>, f: &mut dyn FnMut(&Model, &[String])) {
        match self {
            Value::Model(m) => f(m, prefix),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    prefix.push(i.to_string());
                    item.for_each_model(prefix, f);
                    prefix.pop();
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    prefix.push(k.clone());
                    v.for_each_model(prefix, f);
                    prefix.pop();
                }
            }
            _ => {}
        }
    }
}

impl Value {
    /// Structural equality; observable pairs already being compared count as
    /// equal, so cyclic observables terminate
    fn eq_guarded(&self, other: &Value, seen: &mut Vec<(*const (), *const ())>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_guarded(y, seen))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_guarded(vb, seen))
            }
            (Value::Model(a), Value::Model(b)) => a.ptr_eq(b),
            (Value::Observable(a), Value::Observable(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let pair = (a.addr(), b.addr());
                if seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let equal = a.get().eq_guarded(&b.get(), seen);
                seen.pop();
                equal
            }
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_guarded(other, &mut Vec::new())
    }
}

/// Shared mutable wrapper around a value
///
/// Cloning an observable yields another handle to the same cell. The
/// serializer treats an observable exactly like the value it wraps.
#[derive(Clone)]
pub struct Observable(Arc<RwLock<Value>>);

impl Observable {
    pub fn new(inner: Value) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    /// Current wrapped value
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Replace the wrapped value
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(inner) => write!(f, "Observable({:?})", *inner),
            None => write!(f, "Observable(<locked>)"),
        }
    }
}

/// Handle to a host object that has no data representation
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(inner),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.inner) as *const (),
            Arc::as_ptr(&other.inner) as *const (),
        )
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}
