//! Registered middleware entries
//!
//! The registry is shared between the dispatcher and every disposer it hands
//! out. Dispatch takes a snapshot of the entries, so registering or disposing
//! while actions are running never changes a chain that was already built.

use super::{ActionMiddleware, MiddlewareEntry};
use crate::context::ActionContext;
use crate::error::{ActionError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MIDDLEWARE_ID: AtomicU64 = AtomicU64::new(1);

/// Registration handle identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(u64);

impl MiddlewareId {
    fn next() -> Self {
        Self(NEXT_MIDDLEWARE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MiddlewareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mw:{}", self.0)
    }
}

/// Ordered set of middleware entries, oldest first
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: RwLock<Vec<(MiddlewareId, MiddlewareEntry)>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; it becomes the innermost middleware
    pub fn register(self: &Arc<Self>, entry: MiddlewareEntry) -> Result<MiddlewareDisposer> {
        let mut entries = self.entries.write();
        if entries.iter().any(|(_, e)| e.identity() == entry.identity()) {
            return Err(ActionError::MiddlewareAlreadyRegistered(entry.name().to_string()));
        }

        let id = MiddlewareId::next();
        tracing::debug!(id = %id, name = entry.name(), scoped = entry.scope().is_some(), "middleware registered");
        entries.push((id, entry));

        Ok(MiddlewareDisposer {
            registry: Arc::clone(self),
            id,
            disposed: AtomicBool::new(false),
        })
    }

    /// Remove an entry; false if it was already gone
    pub fn remove(&self, id: MiddlewareId) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            let index = entries.iter().position(|(eid, _)| *eid == id);
            index.map(|index| entries.remove(index))
        };
        // the entry is dropped after the lock is released
        match removed {
            Some((_, entry)) => {
                tracing::debug!(id = %id, name = entry.name(), "middleware disposed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered entry names, oldest first
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.read().iter().map(|(_, e)| e.name()).collect()
    }

    /// Middlewares that accept `ctx`, outermost first
    ///
    /// Filters run after the lock is released, so they may touch the
    /// registry themselves.
    pub fn chain_for(&self, ctx: &ActionContext) -> Vec<Arc<dyn ActionMiddleware>> {
        let snapshot: Vec<MiddlewareEntry> = self.entries.read().iter().map(|(_, e)| e.clone()).collect();
        snapshot
            .into_iter()
            .filter(|entry| entry.accepts(ctx))
            .map(|entry| entry.middleware)
            .collect()
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("entries", &self.names())
            .finish()
    }
}

/// Removes a registered middleware
///
/// Dropping the disposer leaves the middleware registered.
#[must_use = "dropping the disposer keeps the middleware registered forever"]
pub struct MiddlewareDisposer {
    registry: Arc<MiddlewareRegistry>,
    id: MiddlewareId,
    disposed: AtomicBool,
}

impl MiddlewareDisposer {
    pub fn id(&self) -> MiddlewareId {
        self.id
    }

    /// Unregister the middleware; later calls return false and do nothing
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry.remove(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MiddlewareDisposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareDisposer")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
