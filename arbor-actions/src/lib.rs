//! Arbor actions - action interception over a tree of models
//!
//! This crate turns method calls on models into observable, interceptable
//! actions. Every call of a registered action runs inside an
//! `ActionContext`, passes through a chain of middleware, and can be recorded
//! as a plain `SerializableActionCall` and replayed on another tree.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                           │
//! │                                                              │
//! │  model.call("addY", args)                                    │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  ┌──────────────┐   push    ┌──────────────┐                 │
//! │  │ActionContext │ ────────► │ ContextStack │                 │
//! │  └──────┬───────┘   pop     └──────────────┘                 │
//! │         │                                                    │
//! │         ▼  snapshot of matching entries                      │
//! │  ┌─────────────────────────────────────────────┐             │
//! │  │ MiddlewareRegistry                           │             │
//! │  │  ┌────────────┐  ┌────────────┐              │             │
//! │  │  │ serializer │→ │  logging   │→ ... → body  │             │
//! │  │  └────────────┘  └────────────┘              │             │
//! │  └─────────────────────────────────────────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Models
//!
//! A **model** is a handle to a stateful object with a type tag and an
//! instance id. Models stored in other models' fields become their
//! children. Model writes are only accepted while an action runs, or inside
//! `Dispatcher::run_unprotected`.
//!
//! ## Actions and flows
//!
//! Methods are registered on a `ModelClass` with their kind:
//! - `action`: synchronous, intercepted
//! - `flow`: asynchronous, intercepted once per step
//! - `method`: plain, not intercepted
//!
//! ## Middleware
//!
//! An `ActionMiddleware` sees each context and decides whether and how to
//! continue the chain. `action_serializer_middleware` is the built-in
//! middleware that records calls for replay with `apply_action`.
//!
//! # Example
//!
//! ```rust
//! use arbor_actions::{action_serializer_middleware, ActionSerializerConfig, Dispatcher, ModelClass, Value};
//! use std::sync::{Arc, Mutex};
//!
//! let counter = ModelClass::builder("Counter")
//!     .action("add", |model, args| {
//!         let n = model.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
//!         let by = args.first().and_then(Value::as_i64).unwrap_or(1);
//!         model.set("n", Value::from(n + by))?;
//!         Ok(Value::from(n + by))
//!     })
//!     .build()?;
//!
//! let dispatcher = Dispatcher::new();
//! let model = dispatcher.create_model(&counter, Value::Null)?;
//!
//! let calls = Arc::new(Mutex::new(Vec::new()));
//! let sink = calls.clone();
//! let disposer = dispatcher.add_middleware(action_serializer_middleware(
//!     ActionSerializerConfig::new(&model),
//!     move |call, _ctx| sink.lock().unwrap().push(call),
//! ))?;
//!
//! assert_eq!(model.call("add", vec![Value::from(2)])?, Value::from(2));
//! assert_eq!(calls.lock().unwrap()[0].name, "add");
//! disposer.dispose();
//! # Ok::<(), arbor_actions::ActionError>(())
//! ```

// Modules
pub mod apply;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod middleware;
pub mod model;
mod protection;
pub mod serializer;
pub mod special;
pub mod value;

// Re-exports for convenience
pub use apply::{apply_action, apply_flow_action, ActionCall};
pub use config::{ConfigError, DispatcherConfig};
pub use context::{ActionContext, ContextStack, StackFrame};
pub use dispatcher::Dispatcher;
pub use error::{ActionError, Result};
pub use flow::{FlowCanceller, FlowScope, FlowState, FlowTask, Suspend};
pub use middleware::{
    middleware_fn, ActionMiddleware, CollectedCall, CollectingMiddleware, FnMiddleware, LoggingMiddleware,
    MiddlewareDisposer, MiddlewareEntry, MiddlewareId, MiddlewareRegistry, Next,
};
pub use model::{ActionFn, ActionTagging, FlowFn, Model, ModelClass, ModelClassBuilder, MODEL_ID_KEY, MODEL_TYPE_KEY};
pub use serializer::{action_serializer_middleware, serialize_action_call, ActionSerializerConfig, UnserializablePolicy};
pub use special::{is_special_action, SpecialAction};
pub use value::{Observable, Opaque, Unrepresentable, Value};

pub use arbor_types::{
    ActionContextActionType, ActionContextAsyncStepType, ContextId, MethodKind, ModelId, ModelType,
    SerializableActionCall,
};
