//! Error types for the action layer

use arbor_types::{ContextId, MethodKind, ModelId, ModelType};
use std::fmt;
use thiserror::Error;

/// Errors raised while dispatching actions
#[derive(Debug, Error)]
pub enum ActionError {
    /// The serializer met an argument it cannot represent and no policy was configured
    #[error(
        "argument #{index} is unserializable while running .{action}() - consider configuring `on_unserializable_argument`"
    )]
    UnserializableArgument { action: String, index: usize },

    /// A context was popped while it was not the top of the stack
    #[error("context stack discipline violated: popped {expected} but the top of the stack is {found}")]
    StackDiscipline { expected: ContextId, found: String },

    /// Too many nested action contexts
    #[error("action context stack exceeded the maximum depth of {depth}")]
    StackOverflow { depth: usize },

    /// A model was written with no current action and no unprotected exemption
    #[error(
        "model {model_type}#{model_id} cannot be modified outside of an action; use an action or run_unprotected"
    )]
    MutationOutsideAction {
        model_type: ModelType,
        model_id: ModelId,
    },

    /// A flow was cancelled between two steps
    #[error("flow .{action}() was cancelled")]
    FlowCancelled { action: String },

    /// A finished flow was polled again
    #[error("flow .{action}() already finished")]
    FlowFinished { action: String },

    /// The model class has no method with that name
    #[error("model type {model_type} has no method named {action}")]
    UnknownAction {
        model_type: ModelType,
        action: String,
    },

    /// The method exists but is dispatched differently
    #[error(".{action}() is a {actual}, not a {expected}")]
    WrongMethodKind {
        action: String,
        expected: MethodKind,
        actual: MethodKind,
    },

    /// No model lives at the given path
    #[error("no model found at path {}", DisplayPath(.path))]
    PathNotFound { path: Vec<String> },

    /// The model is already owned at another edge
    #[error("model {model_id} is already attached elsewhere; remove it from its current position first")]
    AlreadyAttached { model_id: ModelId },

    /// The same middleware instance is registered twice
    #[error("middleware {0} is already registered")]
    MiddlewareAlreadyRegistered(String),

    /// Method names starting with `$$` are reserved
    #[error("method name {0} is reserved for special actions")]
    ReservedActionName(String),

    /// Model data is not an object
    #[error("invalid model data: {0}")]
    InvalidModelData(String),

    /// The snapshot belongs to another model
    #[error("snapshot does not describe model {model_type}#{model_id}")]
    SnapshotMismatch {
        model_type: ModelType,
        model_id: ModelId,
    },

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors raised by action bodies
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    /// Wrap an arbitrary message as an action body error
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        ActionError::Other(anyhow::Error::msg(message))
    }

    /// Whether this error is the terminal error of a cancelled flow
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::FlowCancelled { .. })
    }
}

struct DisplayPath<'a>(&'a [String]);

impl fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "/")
        } else {
            for segment in self.0 {
                write!(f, "/{}", segment)?;
            }
            Ok(())
        }
    }
}

/// Result type using ActionError
pub type Result<T> = std::result::Result<T, ActionError>;
