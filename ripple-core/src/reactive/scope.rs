//! Ownership scopes for groups of nodes.

use std::fmt;

use tracing::debug;

use super::context::OwnerGuard;
use super::runtime::Runtime;
use crate::graph::ScopeId;

/// A group of nodes disposed together.
///
/// Every signal, computed and effect created inside [`run`](Self::run) is
/// owned by the scope, and so is every scope created there.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let rt = Runtime::new();
/// let scope = rt.create_scope();
/// let count = scope.run(|| rt.signal(0));
///
/// scope.dispose_all();
/// assert!(count.is_disposed());
/// ```
#[derive(Clone)]
pub struct Scope {
    id: ScopeId,
    rt: Runtime,
}

impl Scope {
    pub(crate) fn new(id: ScopeId, rt: Runtime) -> Self {
        Self { id, rt }
    }

    /// The scope's id.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Run `f` with this scope as the owner of new nodes.
    ///
    /// On a disposed scope `f` still runs, but what it creates is unowned.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.rt.scope_alive(self.id) {
            debug!(scope = self.id.raw(), "running in a disposed scope");
            return f();
        }
        let _owner = OwnerGuard::enter(&self.rt, self.id);
        f()
    }

    /// Dispose every node the scope and its child scopes own: children
    /// first, then nodes in reverse creation order. Idempotent.
    pub fn dispose_all(&self) {
        self.rt.dispose_all(self);
    }

    /// Whether the scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        !self.rt.scope_alive(self.id)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
