//! Unprotected-execution exemption
//!
//! Writes to a model are normally only allowed while an action runs. A
//! `run_unprotected` scope lifts that restriction without pushing a context,
//! so middleware never sees it. Scopes nest; the exemption ends when the
//! outermost one does.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Depth counter of active unprotected scopes
#[derive(Debug, Default)]
pub(crate) struct Exemption {
    depth: AtomicUsize,
}

impl Exemption {
    pub(crate) fn is_active(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
    }

    pub(crate) fn enter(&self) -> ExemptionGuard<'_> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(depth, "unprotected scope entered");
        ExemptionGuard { exemption: self }
    }
}

/// Ends one unprotected scope when dropped, also on panic
pub(crate) struct ExemptionGuard<'a> {
    exemption: &'a Exemption,
}

impl Drop for ExemptionGuard<'_> {
    fn drop(&mut self) {
        let previous = self.exemption.depth.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(depth = previous - 1, "unprotected scope left");
    }
}
