//! Stack of currently running action contexts
//!
//! Contexts are pushed when an action (or flow step) starts and popped when
//! it ends, strictly in LIFO order. `StackFrame` ties one push to exactly one
//! pop, including when the body panics.

use super::ActionContext;
use crate::error::{ActionError, Result};
use parking_lot::Mutex;

/// LIFO stack of running contexts
#[derive(Debug)]
pub struct ContextStack {
    frames: Mutex<Vec<ActionContext>>,
    max_depth: usize,
}

impl ContextStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            max_depth,
        }
    }

    /// The innermost running context
    pub fn current(&self) -> Option<ActionContext> {
        self.frames.lock().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn push(&self, ctx: ActionContext) -> Result<()> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.max_depth {
            tracing::warn!(depth = frames.len(), action = ctx.action_name(), "context stack overflow");
            return Err(ActionError::StackOverflow {
                depth: self.max_depth,
            });
        }
        tracing::trace!(ctx = %ctx.id(), action = ctx.action_name(), depth = frames.len() + 1, "push");
        frames.push(ctx);
        Ok(())
    }

    /// Pop `ctx`, which must be the top of the stack
    pub fn pop(&self, ctx: &ActionContext) -> Result<()> {
        let mut frames = self.frames.lock();
        match frames.last() {
            Some(top) if top.ptr_eq(ctx) => {
                frames.pop();
                tracing::trace!(ctx = %ctx.id(), depth = frames.len(), "pop");
                Ok(())
            }
            top => {
                let found = top.map_or_else(|| "empty".to_string(), |t| t.id().to_string());
                tracing::error!(expected = %ctx.id(), found = %found, "context stack discipline violated");
                Err(ActionError::StackDiscipline {
                    expected: ctx.id(),
                    found,
                })
            }
        }
    }

    /// Push `ctx` and return a frame that pops it again
    pub fn enter(&self, ctx: ActionContext) -> Result<StackFrame<'_>> {
        self.push(ctx.clone())?;
        Ok(StackFrame {
            stack: self,
            ctx,
            popped: false,
        })
    }
}

/// One pushed context; pops on `exit` or on drop
#[derive(Debug)]
pub struct StackFrame<'a> {
    stack: &'a ContextStack,
    ctx: ActionContext,
    popped: bool,
}

impl StackFrame<'_> {
    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Pop the context, reporting discipline violations
    pub fn exit(mut self) -> Result<()> {
        self.popped = true;
        self.stack.pop(&self.ctx)
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        if !self.popped {
            // Unwinding: the error was already logged by pop.
            let _ = self.stack.pop(&self.ctx);
        }
    }
}
