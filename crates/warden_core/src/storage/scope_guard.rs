//! Releasable subscription handle.

use std::fmt::{Debug, Formatter};

type ReleaseAction = Box<dyn FnOnce() + Send>;

/// Composite guard holding release actions; all of them run on `release` or
/// on drop.
///
/// Order of release is not meaningful.
#[must_use = "dropping a ScopeGuard releases the subscription immediately"]
#[derive(Default)]
pub struct ScopeGuard {
    actions: Vec<ReleaseAction>,
}

impl ScopeGuard {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// Guard with nothing to release.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Takes over every release action of `other`.
    pub fn join(&mut self, mut other: ScopeGuard) {
        self.actions.append(&mut other.actions);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Runs all release actions now. Calling it again is a no-op.
    pub fn release(&mut self) {
        for action in self.actions.drain(..) {
            action();
        }
    }

    /// Forgets the release actions without running them.
    pub fn dismiss(&mut self) {
        self.actions.clear();
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl Debug for ScopeGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("actions", &self.actions.len())
            .finish()
    }
}
