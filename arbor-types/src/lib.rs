//! Shared types for arbor
//!
//! This crate provides the identity types of the model substrate, the
//! classification enums of action contexts, and the JSON wire record
//! produced by the action serializer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Model instance identifier
///
/// Stable for the lifetime of a model instance and carried in its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl ModelId {
    /// Create a new random model ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model type tag (e.g. `"todo/List"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelType(pub String);

impl ModelType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ModelType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Action context identifier
///
/// Monotonically increasing across the process, used for stack discipline
/// checks and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Allocate the next context ID
    pub fn next() -> Self {
        Self(CONTEXT_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Whether an action context belongs to a plain action or to a flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionContextActionType {
    Sync,
    Async,
}

impl fmt::Display for ActionContextActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionContextActionType::Sync => write!(f, "sync"),
            ActionContextActionType::Async => write!(f, "async"),
        }
    }
}

/// Step of a flow an async context describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionContextAsyncStepType {
    /// The flow was started
    Spawn,
    /// Continuation after an awaited value resolved
    Resume,
    /// Continuation after an awaited value failed
    ResumeError,
    /// The flow completed normally
    Return,
    /// The flow completed with an error
    Throw,
}

impl ActionContextAsyncStepType {
    /// Whether this step ends its flow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionContextAsyncStepType::Return | ActionContextAsyncStepType::Throw
        )
    }
}

impl fmt::Display for ActionContextAsyncStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionContextAsyncStepType::Spawn => "spawn",
            ActionContextAsyncStepType::Resume => "resume",
            ActionContextAsyncStepType::ResumeError => "resumeError",
            ActionContextAsyncStepType::Return => "return",
            ActionContextAsyncStepType::Throw => "throw",
        };
        write!(f, "{}", name)
    }
}

/// How a model method is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodKind {
    /// Intercepted synchronous mutator
    Action,
    /// Intercepted multi-step asynchronous action
    Flow,
    /// Plain method, not intercepted
    Plain,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::Action => write!(f, "action"),
            MethodKind::Flow => write!(f, "flow"),
            MethodKind::Plain => write!(f, "plain method"),
        }
    }
}

/// JSON-safe description of one action call, addressed relative to a root
/// model
///
/// This is the wire format emitted by the action serializer and accepted
/// back for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableActionCall {
    /// Action name
    pub name: String,
    /// Ownership edges from the root to the target (empty for the root)
    pub path: Vec<String>,
    /// Arguments as plain JSON
    pub args: Vec<serde_json::Value>,
}

impl SerializableActionCall {
    pub fn new(name: impl Into<String>, path: Vec<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            path,
            args,
        }
    }

    /// Whether the call targets the serialization root itself
    pub fn targets_root(&self) -> bool {
        self.path.is_empty()
    }
}
