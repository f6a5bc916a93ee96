//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! the runtime links it to the consumer on top of the context stack.
//!
//! # Implementation
//!
//! Each runtime owns a stack of evaluation frames. Running a computed or an
//! effect pushes a frame for that node; [`Runtime::untracked`] pushes a frame
//! with no consumer. A frame also carries the relink cursor (see
//! `graph::edge`), and popping it trims whatever the evaluation did not read.
//!
//! Frames and the other per-evaluation bits of state are managed by guards
//! that undo their change on drop, so the runtime stays consistent even if
//! a user body panics.

use tracing::warn;

use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::{EdgeId, Flags, NodeId, ScopeId};

/// An entry in the context stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    /// The consumer being evaluated; `None` for untracked sections.
    consumer: Option<NodeId>,
    /// Last dependency edge confirmed during this evaluation.
    tail: Option<EdgeId>,
}

/// Stack of evaluation frames.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, consumer: Option<NodeId>) {
        self.frames.push(Frame {
            consumer,
            tail: None,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The consumer reads should be linked to, if any.
    pub(crate) fn current_consumer(&self) -> Option<NodeId> {
        self.frames.last().and_then(|frame| frame.consumer)
    }

    /// Cursor of the innermost frame.
    pub(crate) fn tail_mut(&mut self) -> Option<&mut Option<EdgeId>> {
        self.frames.last_mut().map(|frame| &mut frame.tail)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Guard for one tracked (or untracked) section.
///
/// On drop the frame is popped and the consumer's unread dependencies are
/// unlinked.
pub(crate) struct TrackingScope<'a> {
    rt: &'a Runtime,
    consumer: Option<NodeId>,
}

impl<'a> TrackingScope<'a> {
    /// Start tracking reads for `consumer`.
    pub(crate) fn enter(rt: &'a Runtime, consumer: NodeId) -> Self {
        rt.inner().context.borrow_mut().push(Some(consumer));
        Self {
            rt,
            consumer: Some(consumer),
        }
    }

    /// Start a section whose reads are not tracked.
    pub(crate) fn untracked(rt: &'a Runtime) -> Self {
        rt.inner().context.borrow_mut().push(None);
        Self { rt, consumer: None }
    }
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let popped = self.rt.inner().context.borrow_mut().pop();

        // Verify we're popping the right frame.
        let Some(frame) = popped else {
            warn!("context stack underflow");
            return;
        };
        debug_assert_eq!(
            frame.consumer, self.consumer,
            "context mismatch: expected {:?}, got {:?}",
            self.consumer, frame.consumer
        );

        // After a panic the frame's cursor does not cover every dependency,
        // so the old edges stay until the node is evaluated again.
        if std::thread::panicking() {
            return;
        }
        if let Some(consumer) = frame.consumer {
            self.rt
                .inner()
                .graph
                .borrow_mut()
                .trim_dependencies(consumer, frame.tail);
        }
    }
}

/// Guard that holds the `RUNNING` flag on a node and one level of the
/// evaluation depth budget.
pub(crate) struct RunningGuard<'a> {
    rt: &'a Runtime,
    id: NodeId,
}

impl<'a> RunningGuard<'a> {
    pub(crate) fn enter(rt: &'a Runtime, id: NodeId) -> Result<Self, ReactiveError> {
        let inner = rt.inner();
        let depth = inner.depth.get();
        let limit = inner.config.max_depth;
        if depth >= limit {
            warn!(node = %id, limit, "evaluation depth exceeded");
            return Err(ReactiveError::DepthExceeded { node: id, limit });
        }
        inner.depth.set(depth + 1);
        if let Some(node) = inner.graph.borrow_mut().node_mut(id) {
            node.flags.insert(Flags::RUNNING);
        }
        Ok(Self { rt, id })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let inner = self.rt.inner();
        inner.depth.set(inner.depth.get().saturating_sub(1));
        if let Some(node) = inner.graph.borrow_mut().node_mut(self.id) {
            node.flags.remove(Flags::RUNNING);
            // A body panicked: make sure the next read or write reaches it again
            if std::thread::panicking() {
                node.flags.remove(Flags::NOTIFIED);
                node.flags.insert(Flags::OUTDATED | Flags::DIRTY);
            }
        }
    }
}

/// Guard that makes a scope the owner of nodes created while it is alive.
pub(crate) struct OwnerGuard<'a> {
    rt: &'a Runtime,
    scope: ScopeId,
}

impl<'a> OwnerGuard<'a> {
    pub(crate) fn enter(rt: &'a Runtime, scope: ScopeId) -> Self {
        rt.inner().owners.borrow_mut().push(scope);
        Self { rt, scope }
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        let popped = self.rt.inner().owners.borrow_mut().pop();
        debug_assert_eq!(popped, Some(self.scope), "owner stack mismatch");
    }
}
