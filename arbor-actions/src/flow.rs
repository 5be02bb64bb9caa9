//! Flows: asynchronous actions driven as an explicit state machine
//!
//! A flow is a future built by the flow body. The `FlowTask` returned by
//! `Model::call_flow` drives it one step at a time, and every step runs as
//! its own action context through the middleware chain:
//!
//! - `Spawn` runs eagerly inside `call_flow`, up to the first suspension.
//! - Each time a suspended future settles, a `Resume` (success) or
//!   `ResumeError` (failure) step polls the body again.
//! - Completion runs a terminal `Return` or `Throw` step whose chain result
//!   is the flow's result.
//!
//! Between steps the context stack holds nothing of the flow, so other
//! actions and other flows may run. Every step after `Spawn` has the spawn
//! context as its parent, which keeps all steps under one root.

use crate::context::ActionContext;
use crate::dispatcher::Dispatcher;
use crate::error::{ActionError, Result};
use crate::model::{FlowFn, Model};
use crate::value::Value;
use arbor_types::ActionContextAsyncStepType as Step;
use futures_util::future::BoxFuture;
use futures_util::task::{noop_waker_ref, AtomicWaker};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Handle a flow body uses to mark its suspension points
///
/// A body may also await futures directly. Those are first polled by the
/// spawn step with a no-op waker, so the first poll of the `FlowTask` always
/// runs one `Resume` step to poll them again with a real waker, whether or
/// not they are ready.
#[derive(Clone)]
pub struct FlowScope {
    shared: Arc<FlowShared>,
}

#[derive(Default)]
struct FlowShared {
    /// Future the body is suspended on
    awaited: Mutex<Option<BoxFuture<'static, Result<Value>>>>,
    /// Its result, handed back to the body on resume
    settled: Mutex<Option<Result<Value>>>,
}

impl FlowScope {
    /// Suspend the flow until `fut` settles
    ///
    /// The future is polled by the `FlowTask` outside of any action context;
    /// once it settles the flow resumes in a new step with its output.
    pub fn suspend<F>(&self, fut: F) -> Suspend
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Suspend {
            shared: Arc::clone(&self.shared),
            pending: Some(Box::pin(fut)),
        }
    }
}

impl fmt::Debug for FlowScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowScope")
            .field("suspended", &self.shared.awaited.lock().is_some())
            .finish()
    }
}

/// Future returned by `FlowScope::suspend`
#[must_use = "a suspension does nothing unless awaited"]
pub struct Suspend {
    shared: Arc<FlowShared>,
    pending: Option<BoxFuture<'static, Result<Value>>>,
}

impl Future for Suspend {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(fut) = self.pending.take() {
            *self.shared.awaited.lock() = Some(fut);
            return Poll::Pending;
        }
        match self.shared.settled.lock().take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

/// Lifecycle of a flow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// The spawn step is running
    Spawned,
    /// Waiting between steps
    Suspended,
    /// A resume step is running
    Resumed,
    /// Finished through a `Return` step
    Completed,
    /// Finished through a `Throw` step
    Failed,
}

impl FlowState {
    pub fn is_finished(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Requests cancellation of a running flow
#[derive(Clone)]
pub struct FlowCanceller {
    state: Arc<CancelState>,
}

impl FlowCanceller {
    /// Make the next poll end the flow with `FlowCancelled`
    ///
    /// No step of the flow runs after the terminal `Throw` step.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.waker.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FlowCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCanceller")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A running flow; resolves to the result of its terminal step
#[must_use = "a flow only makes progress when polled"]
pub struct FlowTask {
    dispatcher: Dispatcher,
    target: Model,
    action_name: String,
    args: Vec<Value>,
    spawn_ctx: ActionContext,
    /// Root of every step's context chain, kept alive for the flow's lifetime
    root_ctx: ActionContext,
    shared: Arc<FlowShared>,
    start: Option<FlowFn>,
    body: Option<BoxFuture<'static, Result<Value>>>,
    state: FlowState,
    cancel: Arc<CancelState>,
    outcome: Option<Result<Value>>,
}

impl FlowTask {
    /// Create the flow and run its spawn step
    pub(crate) fn spawn(target: &Model, name: &str, args: Vec<Value>, body: FlowFn) -> FlowTask {
        let dispatcher = target.dispatcher().clone();
        let parent = dispatcher.current_action_context();
        let spawn_ctx = ActionContext::new(name, Some(Step::Spawn), target.clone(), args.clone(), parent.as_ref());
        let root_ctx = spawn_ctx.root_context();
        tracing::debug!(ctx = %spawn_ctx.id(), target = %target, action = name, "flow spawned");

        let mut task = FlowTask {
            dispatcher,
            target: target.clone(),
            action_name: name.to_string(),
            args,
            spawn_ctx,
            root_ctx,
            shared: Arc::new(FlowShared::default()),
            start: Some(body),
            body: None,
            state: FlowState::Spawned,
            cancel: Arc::new(CancelState::default()),
            outcome: None,
        };

        let mut cx = Context::from_waker(noop_waker_ref());
        if let Poll::Ready(outcome) = task.drive(Step::Spawn, &mut cx) {
            task.outcome = Some(outcome);
        }
        task
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Context of the spawn step; parent of every later step
    pub fn spawn_context(&self) -> &ActionContext {
        &self.spawn_ctx
    }

    /// Root shared by all of this flow's step contexts
    pub fn root_context(&self) -> &ActionContext {
        &self.root_ctx
    }

    pub fn canceller(&self) -> FlowCanceller {
        FlowCanceller {
            state: Arc::clone(&self.cancel),
        }
    }

    fn step_context(&self, step: Step) -> ActionContext {
        match step {
            Step::Spawn => self.spawn_ctx.clone(),
            _ => ActionContext::new(
                self.action_name.clone(),
                Some(step),
                self.target.clone(),
                self.args.clone(),
                Some(&self.spawn_ctx),
            ),
        }
    }

    /// Run one non-terminal step: poll the body inside the step's chain
    fn drive(&mut self, step: Step, cx: &mut Context<'_>) -> Poll<Result<Value>> {
        if step != Step::Spawn {
            self.state = FlowState::Resumed;
        }
        let ctx = self.step_context(step);
        tracing::trace!(ctx = %ctx.id(), action = %self.action_name, %step, "flow step");

        let dispatcher = self.dispatcher.clone();
        let scope = FlowScope {
            shared: Arc::clone(&self.shared),
        };
        let target = self.target.clone();
        let args = self.args.clone();
        let start = &mut self.start;
        let body = &mut self.body;
        let mut polled = None;

        let chain_result = dispatcher.run_in_context(&ctx, || {
            if let Some(start) = start.take() {
                *body = Some(start(scope, target, args));
            }
            if let Some(fut) = body.as_mut() {
                polled = Some(fut.as_mut().poll(cx));
            }
            Ok(Value::Null)
        });

        match (chain_result, polled) {
            (Err(err), _) => Poll::Ready(self.finish(Err(err))),
            // a middleware answered for the body
            (Ok(value), None) => Poll::Ready(self.finish(Ok(value))),
            (Ok(_), Some(Poll::Pending)) => {
                self.state = FlowState::Suspended;
                Poll::Pending
            }
            (Ok(_), Some(Poll::Ready(result))) => Poll::Ready(self.finish(result)),
        }
    }

    /// Run the terminal step carrying `result` through the chain
    fn finish(&mut self, result: Result<Value>) -> Result<Value> {
        self.body = None;
        self.start = None;
        self.shared.awaited.lock().take();

        let step = if result.is_ok() { Step::Return } else { Step::Throw };
        let ctx = self.step_context(step);
        let outcome = self.dispatcher.run_in_context(&ctx, move || result);

        self.state = if outcome.is_ok() {
            FlowState::Completed
        } else {
            FlowState::Failed
        };
        tracing::debug!(ctx = %ctx.id(), action = %self.action_name, %step, "flow finished");
        outcome
    }
}

impl Future for FlowTask {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(outcome) = this.outcome.take() {
            return Poll::Ready(outcome);
        }
        if this.state.is_finished() {
            return Poll::Ready(Err(ActionError::FlowFinished {
                action: this.action_name.clone(),
            }));
        }
        this.cancel.waker.register(cx.waker());

        loop {
            if this.cancel.cancelled.load(Ordering::Acquire) {
                tracing::debug!(action = %this.action_name, "flow cancelled");
                let err = ActionError::FlowCancelled {
                    action: this.action_name.clone(),
                };
                return Poll::Ready(this.finish(Err(err)));
            }

            let awaited = this.shared.awaited.lock().take();
            let step = match awaited {
                Some(mut fut) => match fut.as_mut().poll(cx) {
                    Poll::Pending => {
                        *this.shared.awaited.lock() = Some(fut);
                        return Poll::Pending;
                    }
                    Poll::Ready(settled) => {
                        let step = if settled.is_ok() {
                            Step::Resume
                        } else {
                            Step::ResumeError
                        };
                        *this.shared.settled.lock() = Some(settled);
                        step
                    }
                },
                // the body awaited something outside `suspend`; it is polled
                // again, and woken by that future from then on
                None => Step::Resume,
            };

            if let Poll::Ready(outcome) = this.drive(step, cx) {
                return Poll::Ready(outcome);
            }
            // a new suspension has not been polled yet; anything else woke us already
            if this.shared.awaited.lock().is_none() {
                return Poll::Pending;
            }
        }
    }
}

impl Drop for FlowTask {
    /// Dropping an unfinished flow cancels it through a terminal `Throw` step
    fn drop(&mut self) {
        if self.state.is_finished() || std::thread::panicking() {
            return;
        }
        tracing::debug!(action = %self.action_name, state = ?self.state, "unfinished flow dropped");
        let err = ActionError::FlowCancelled {
            action: self.action_name.clone(),
        };
        if let Err(err) = self.finish(Err(err)) {
            tracing::trace!(action = %self.action_name, %err, "dropped flow thrown");
        }
    }
}

impl fmt::Debug for FlowTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTask")
            .field("action", &self.action_name)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("spawn_ctx", &self.spawn_ctx.id())
            .finish()
    }
}
