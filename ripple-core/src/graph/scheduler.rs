//! Update Scheduler
//!
//! The push half of propagation. When a producer's value changes, the
//! [`Marker`] walks its subscribers and flags them; effects it reaches are
//! queued here until the outermost batch ends.
//!
//! # Algorithm
//!
//! 1. Direct subscribers of the changed producer get `OUTDATED`.
//! 2. Every reached node gets `NOTIFIED`. A node that already carries
//!    `NOTIFIED` was marked by an earlier pass and not validated since, so
//!    everything below it is already marked: the walk does not descend.
//! 3. Computeds are descended into. Effects are queued.
//! 4. Nothing is recomputed here. Computeds resolve lazily when read, and
//!    queued effects resolve when the scheduler flushes them.
//!
//! The pending queue is an insertion-ordered set, so effects run in the order
//! they were first notified and an effect notified twice runs once.

use indexmap::IndexSet;
use tracing::trace;

use super::node::{Flags, Node, NodeId, NodeKind};
use super::traversal::{Visit, Visitor};

/// Batch depth and the queue of effects waiting to run.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: IndexSet<NodeId>,
    batch_depth: usize,
    changed_in_batch: bool,
}

impl Scheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batch level. Returns true for the outermost level.
    pub fn enter_batch(&mut self) -> bool {
        self.batch_depth += 1;
        self.batch_depth == 1
    }

    /// Close a batch level. Returns true if no batch remains open.
    pub fn exit_batch(&mut self) -> bool {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 {
            self.changed_in_batch = false;
            true
        } else {
            false
        }
    }

    /// Current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.batch_depth
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Record a value change in the current top-level operation.
    ///
    /// Returns true only for the first change, which is when the global
    /// version must be bumped.
    pub fn record_change(&mut self) -> bool {
        !std::mem::replace(&mut self.changed_in_batch, true)
    }

    /// Queue an effect. Returns false if it was already queued.
    pub fn enqueue(&mut self, id: NodeId) -> bool {
        self.pending.insert(id)
    }

    /// Drop an effect from the queue.
    pub fn dequeue(&mut self, id: NodeId) -> bool {
        self.pending.shift_remove(&id)
    }

    /// Take the whole queue, leaving it empty.
    pub fn take_pending(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.pending)
    }

    /// Number of queued effects.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queued effects, in run order.
    pub fn pending(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pending.iter().copied()
    }

    pub(crate) fn pending_mut(&mut self) -> &mut IndexSet<NodeId> {
        &mut self.pending
    }
}

/// Visitor that marks consumers after a producer changed.
pub struct Marker<'a> {
    pending: &'a mut IndexSet<NodeId>,
    cycle: Option<(NodeId, NodeKind)>,
    trace: bool,
    marked: usize,
}

impl<'a> Marker<'a> {
    /// Create a marker that queues reached effects into `pending`.
    pub fn new(pending: &'a mut IndexSet<NodeId>, trace: bool) -> Self {
        Self {
            pending,
            cycle: None,
            trace,
            marked: 0,
        }
    }

    /// The first node found in the `RUNNING` state, if any.
    pub fn cycle(&self) -> Option<(NodeId, NodeKind)> {
        self.cycle
    }

    /// Number of nodes newly marked `NOTIFIED`.
    pub fn marked(&self) -> usize {
        self.marked
    }
}

impl Visitor for Marker<'_> {
    fn visit(&mut self, id: NodeId, node: &mut Node, direct: bool) -> Visit {
        if node.flags.contains(Flags::RUNNING) {
            // Reached a node whose own evaluation is on the stack
            self.cycle.get_or_insert((id, node.kind()));
            return Visit::Skip;
        }

        if direct {
            node.flags.insert(Flags::OUTDATED);
        }
        if node.flags.contains(Flags::NOTIFIED) {
            return Visit::Skip;
        }
        node.flags.insert(Flags::NOTIFIED);
        self.marked += 1;

        if self.trace {
            trace!(node = %id, kind = %node.kind(), direct, "marked");
        }

        match node.kind() {
            NodeKind::Computed => Visit::Descend,
            NodeKind::Effect => {
                self.pending.insert(id);
                Visit::Skip
            }
            NodeKind::Signal => Visit::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn link(graph: &mut Graph, consumer: NodeId, producers: &[NodeId]) {
        let mut tail = None;
        for &p in producers {
            tail = graph.link(p, consumer, tail);
        }
        if let Some(node) = graph.node_mut(consumer) {
            node.flags = Flags::NONE;
        }
    }

    fn flags(graph: &Graph, id: NodeId) -> Flags {
        graph.node(id).map(|n| n.flags()).unwrap_or_default()
    }

    #[test]
    fn batch_depth_nesting() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.enter_batch());
        assert!(!scheduler.enter_batch());
        assert!(!scheduler.exit_batch());
        assert!(scheduler.is_batching());
        assert!(scheduler.exit_batch());
        assert!(!scheduler.is_batching());
    }

    #[test]
    fn first_change_per_batch_is_reported_once() {
        let mut scheduler = Scheduler::new();
        scheduler.enter_batch();
        assert!(scheduler.record_change());
        assert!(!scheduler.record_change());
        scheduler.exit_batch();

        scheduler.enter_batch();
        assert!(scheduler.record_change());
    }

    #[test]
    fn pending_queue_keeps_first_insertion_order() {
        let mut scheduler = Scheduler::new();
        let a = NodeId::new(0, 0);
        let b = NodeId::new(1, 0);
        assert!(scheduler.enqueue(b));
        assert!(scheduler.enqueue(a));
        assert!(!scheduler.enqueue(b));
        assert_eq!(scheduler.pending().collect::<Vec<_>>(), vec![b, a]);

        assert!(scheduler.dequeue(b));
        assert_eq!(scheduler.take_pending().into_iter().collect::<Vec<_>>(), vec![a]);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    fn marker_flags_and_queues() {
        // s -> m -> e1
        // s -> e2
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let m = graph.insert_node(NodeKind::Computed, None);
        let e1 = graph.insert_node(NodeKind::Effect, None);
        let e2 = graph.insert_node(NodeKind::Effect, None);
        link(&mut graph, m, &[s]);
        link(&mut graph, e1, &[m]);
        link(&mut graph, e2, &[s]);

        let mut scheduler = Scheduler::new();
        let mut marker = Marker::new(scheduler.pending_mut(), false);
        graph.walk_subscribers(s, &mut marker);
        assert_eq!(marker.marked(), 3);
        assert!(marker.cycle().is_none());

        assert_eq!(flags(&graph, m), Flags::OUTDATED | Flags::NOTIFIED);
        assert_eq!(flags(&graph, e1), Flags::NOTIFIED);
        assert_eq!(flags(&graph, e2), Flags::OUTDATED | Flags::NOTIFIED);
        assert_eq!(scheduler.pending().collect::<Vec<_>>(), vec![e1, e2]);
    }

    #[test]
    fn marker_visits_diamond_bottom_once() {
        // s -> a -> c, s -> b -> c
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let a = graph.insert_node(NodeKind::Computed, None);
        let b = graph.insert_node(NodeKind::Computed, None);
        let c = graph.insert_node(NodeKind::Effect, None);
        link(&mut graph, a, &[s]);
        link(&mut graph, b, &[s]);
        link(&mut graph, c, &[a, b]);

        let mut scheduler = Scheduler::new();
        let mut marker = Marker::new(scheduler.pending_mut(), false);
        graph.walk_subscribers(s, &mut marker);
        assert_eq!(marker.marked(), 3);
        assert_eq!(scheduler.pending_len(), 1);
    }

    #[test]
    fn marker_reports_running_node() {
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let e = graph.insert_node(NodeKind::Effect, None);
        link(&mut graph, e, &[s]);
        if let Some(node) = graph.node_mut(e) {
            node.flags.insert(Flags::RUNNING);
        }

        let mut scheduler = Scheduler::new();
        let mut marker = Marker::new(scheduler.pending_mut(), false);
        graph.walk_subscribers(s, &mut marker);
        assert_eq!(marker.cycle(), Some((e, NodeKind::Effect)));
        assert_eq!(scheduler.pending_len(), 0);
    }
}
