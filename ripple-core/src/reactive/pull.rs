//! Pull Propagation
//!
//! The read half of propagation. Marking only flags nodes; a flagged node is
//! brought up to date when something reads it (computeds) or when the
//! scheduler flushes it (effects).
//!
//! # Algorithm
//!
//! To refresh a consumer:
//!
//! 1. If it is `RUNNING`, its own evaluation is on the stack: cycle.
//! 2. If it carries no flags and its checkpoint equals the global version,
//!    nothing anywhere changed since it was last validated: done.
//! 3. If it is `DIRTY` (never ran, or its last run failed), run the body.
//! 4. Otherwise walk its dependency edges in order. Computed producers are
//!    refreshed first, depth first. The first producer whose version differs
//!    from the version cached on the edge means the body must run; if none
//!    differ, the flags are cleared and the node keeps its value.
//!
//! Step 4 is what makes propagation lazy: a computed whose inputs changed but
//! whose output did not keeps its version, so its consumers stop there.

use tracing::{trace, warn};

use super::context::{RunningGuard, TrackingScope};
use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::{Flags, NodeId, NodeKind};

impl Runtime {
    /// Read a node on behalf of the current consumer: refresh it, then link
    /// it unless the refresh failed fatally.
    pub(crate) fn read_node(&self, id: NodeId) -> Result<(), ReactiveError> {
        let result = self.refresh(id);
        match &result {
            Err(err) if err.is_fatal() => {}
            _ => self.track(id),
        }
        result
    }

    /// Bring `id` up to date, re-running its body only if needed.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (kind, flags, settled) = {
            let graph = self.inner().graph.borrow();
            let Some(node) = graph.node(id) else {
                return Ok(());
            };
            (
                node.kind(),
                node.flags(),
                node.is_settled(graph.global_version()),
            )
        };

        if kind == NodeKind::Signal {
            return Ok(());
        }
        if flags.contains(Flags::RUNNING) {
            warn!(node = %id, %kind, "read reached a node that is being evaluated");
            return Err(ReactiveError::Cycle { node: id, kind });
        }
        if settled {
            return Ok(());
        }

        let _running = RunningGuard::enter(self, id)?;
        let result = self.resolve(id, flags);
        if result.is_err() {
            self.mark_failed(id);
        }
        result
    }

    fn resolve(&self, id: NodeId, flags: Flags) -> Result<(), ReactiveError> {
        if flags.contains(Flags::DIRTY) || self.dependencies_changed(id)? {
            return self.evaluate(id);
        }

        trace!(node = %id, "dependencies unchanged");
        let mut graph = self.inner().graph.borrow_mut();
        let global = graph.global_version();
        if let Some(node) = graph.node_mut(id) {
            node.flags.remove(Flags::OUTDATED | Flags::NOTIFIED);
            node.checkpoint = global;
        }
        Ok(())
    }

    /// Whether any producer `id` read in its last run has a new version.
    fn dependencies_changed(&self, id: NodeId) -> Result<bool, ReactiveError> {
        let mut cursor = {
            let graph = self.inner().graph.borrow();
            match graph.node(id) {
                Some(node) => node.deps.head,
                None => return Ok(false),
            }
        };

        while let Some(edge_id) = cursor {
            let (producer, seen) = {
                let graph = self.inner().graph.borrow();
                let edge = graph.edge(edge_id);
                (edge.producer(), edge.version())
            };

            if self.node_kind(producer) == Some(NodeKind::Computed) {
                match self.refresh(producer) {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    // Let the body see the error for itself
                    Err(_) => return Ok(true),
                }
            }

            let graph = self.inner().graph.borrow();
            if !graph.contains(id) {
                return Ok(false);
            }
            let Some(node) = graph.node(producer) else {
                // A producer disposed since the last run counts as a change
                return Ok(true);
            };
            if node.version() != seen {
                trace!(node = %id, %producer, "dependency changed");
                return Ok(true);
            }
            cursor = graph.edge(edge_id).next_dep;
        }
        Ok(false)
    }

    /// Run the body of `id` in a fresh tracking frame.
    fn evaluate(&self, id: NodeId) -> Result<(), ReactiveError> {
        let computation = self.inner().computations.borrow().get(&id).cloned();
        let Some(computation) = computation else {
            return Ok(());
        };

        let outcome = {
            let _tracking = TrackingScope::enter(self, id);
            computation.run(self)
        };
        let changed = outcome?;

        let mut graph = self.inner().graph.borrow_mut();
        let global = graph.global_version();
        if let Some(node) = graph.node_mut(id) {
            if changed {
                node.version += 1;
            }
            node.flags
                .remove(Flags::OUTDATED | Flags::NOTIFIED | Flags::DIRTY);
            node.checkpoint = global;
            trace!(node = %id, changed, version = node.version, "evaluated");
        }
        Ok(())
    }

    /// Leave `id` so that the next read or flush retries it.
    fn mark_failed(&self, id: NodeId) {
        let mut graph = self.inner().graph.borrow_mut();
        if let Some(node) = graph.node_mut(id) {
            node.flags.remove(Flags::NOTIFIED);
            node.flags.insert(Flags::OUTDATED | Flags::DIRTY);
        }
    }
}
