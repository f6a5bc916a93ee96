//! Graph Edges
//!
//! An edge is one producer/consumer relationship. It sits in two intrusive
//! doubly-linked lists at once: the consumer's dependency list ("in") and
//! the producer's subscriber list ("out"). Both lists link through
//! [`EdgeId`]s into the graph's edge arena, so inserting, moving and removing
//! an edge is O(1) and no node ever holds a reference into another.
//!
//! # Relinking
//!
//! A consumer re-tracks its dependencies on every evaluation. Rather than
//! clearing the list up front, the evaluation keeps a cursor (`tail`): the
//! last edge confirmed during this run. Reading a producer either confirms
//! the edge right after the cursor, pulls a matching edge forward from
//! further down the list, or creates a new one. When the evaluation ends,
//! everything after the cursor was not read this time and is trimmed.
//! For the common case of a stable dependency set this allocates nothing.

use tracing::trace;

use super::arena::Graph;
use super::node::NodeId;

/// Identifier of an edge in the edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Head, tail and length of one intrusive edge list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeList {
    pub(crate) head: Option<EdgeId>,
    pub(crate) tail: Option<EdgeId>,
    len: usize,
}

impl EdgeList {
    /// Number of edges in the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A single dependency relationship.
#[derive(Debug, Clone)]
pub struct Edge {
    /// The node being read.
    pub(crate) producer: NodeId,
    /// The node doing the reading.
    pub(crate) consumer: NodeId,
    /// Producer version observed when the edge was last (re)linked.
    pub(crate) version: u64,
    pub(crate) prev_dep: Option<EdgeId>,
    pub(crate) next_dep: Option<EdgeId>,
    pub(crate) prev_sub: Option<EdgeId>,
    pub(crate) next_sub: Option<EdgeId>,
}

impl Edge {
    fn new(producer: NodeId, consumer: NodeId, version: u64) -> Self {
        Self {
            producer,
            consumer,
            version,
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
        }
    }

    /// The producer end.
    pub fn producer(&self) -> NodeId {
        self.producer
    }

    /// The consumer end.
    pub fn consumer(&self) -> NodeId {
        self.consumer
    }

    /// Cached producer version.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Graph {
    /// Record that `consumer` read `producer` during its current evaluation.
    ///
    /// `tail` is the evaluation's cursor; the returned id is the new cursor.
    /// If either node is gone, nothing is linked and the cursor is unchanged.
    pub fn link(
        &mut self,
        producer: NodeId,
        consumer: NodeId,
        tail: Option<EdgeId>,
    ) -> Option<EdgeId> {
        let Some(version) = self.node(producer).map(|node| node.version) else {
            return tail;
        };
        let Some(head) = self.node(consumer).map(|node| node.deps.head) else {
            return tail;
        };

        // Read twice in a row
        if let Some(t) = tail {
            if self.edge(t).producer == producer {
                self.edge_mut(t).version = version;
                return tail;
            }
        }

        // Same order as last time
        let next = match tail {
            Some(t) => self.edge(t).next_dep,
            None => head,
        };
        if let Some(n) = next {
            if self.edge(n).producer == producer {
                self.edge_mut(n).version = version;
                return Some(n);
            }
        }

        // Already confirmed earlier in this evaluation
        if self.confirmed_contains(consumer, tail, producer) {
            return tail;
        }

        // Read last time, but later: move it up to the cursor
        let mut cursor = next.and_then(|n| self.edge(n).next_dep);
        while let Some(c) = cursor {
            if self.edge(c).producer == producer {
                self.detach_dep(c);
                self.attach_dep_after(consumer, tail, c);
                self.edge_mut(c).version = version;
                return Some(c);
            }
            cursor = self.edge(c).next_dep;
        }

        let id = self.alloc_edge(Edge::new(producer, consumer, version));
        self.attach_dep_after(consumer, tail, id);
        self.attach_sub(producer, id);
        trace!(%producer, %consumer, "linked");
        Some(id)
    }

    /// Unlink every dependency of `consumer` after `tail` (all of them when
    /// `tail` is `None`). Returns the number of edges removed.
    pub fn trim_dependencies(&mut self, consumer: NodeId, tail: Option<EdgeId>) -> usize {
        let Some(head) = self.node(consumer).map(|node| node.deps.head) else {
            return 0;
        };
        let mut cursor = match tail {
            Some(t) => self.edge(t).next_dep,
            None => head,
        };
        let mut removed = 0;
        while let Some(id) = cursor {
            cursor = self.edge(id).next_dep;
            self.unlink(id);
            removed += 1;
        }
        removed
    }

    /// Remove every edge touching `node`, on both sides.
    pub fn sever(&mut self, node: NodeId) {
        let Some((deps, subs)) = self.node(node).map(|n| (n.deps.head, n.subs.head)) else {
            return;
        };
        let mut cursor = deps;
        while let Some(id) = cursor {
            cursor = self.edge(id).next_dep;
            self.unlink(id);
        }
        let mut cursor = subs;
        while let Some(id) = cursor {
            cursor = self.edge(id).next_sub;
            self.unlink(id);
        }
    }

    /// Remove one edge from both of its lists and free it.
    pub(crate) fn unlink(&mut self, id: EdgeId) {
        self.detach_dep(id);
        self.detach_sub(id);
        let edge = self.free_edge(id);
        trace!(producer = %edge.producer, consumer = %edge.consumer, "unlinked");
    }

    /// Producers `consumer` depends on, in list order.
    pub fn dependencies(&self, consumer: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.node(consumer).and_then(|node| node.deps.head);
        while let Some(id) = cursor {
            let edge = self.edge(id);
            out.push(edge.producer);
            cursor = edge.next_dep;
        }
        out
    }

    /// Consumers subscribed to `producer`, in subscription order.
    pub fn subscribers(&self, producer: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.node(producer).and_then(|node| node.subs.head);
        while let Some(id) = cursor {
            let edge = self.edge(id);
            out.push(edge.consumer);
            cursor = edge.next_sub;
        }
        out
    }

    /// Whether `producer` appears in `consumer`'s list up to and including
    /// `tail`.
    fn confirmed_contains(&self, consumer: NodeId, tail: Option<EdgeId>, producer: NodeId) -> bool {
        let Some(tail) = tail else {
            return false;
        };
        let mut cursor = self.node(consumer).and_then(|node| node.deps.head);
        while let Some(id) = cursor {
            let edge = self.edge(id);
            if edge.producer == producer {
                return true;
            }
            if id == tail {
                return false;
            }
            cursor = edge.next_dep;
        }
        false
    }

    fn attach_dep_after(&mut self, consumer: NodeId, after: Option<EdgeId>, id: EdgeId) {
        let next = match after {
            Some(a) => self.edge(a).next_dep,
            None => self.node(consumer).and_then(|node| node.deps.head),
        };
        {
            let edge = self.edge_mut(id);
            edge.prev_dep = after;
            edge.next_dep = next;
        }
        match after {
            Some(a) => self.edge_mut(a).next_dep = Some(id),
            None => {
                if let Some(node) = self.node_mut(consumer) {
                    node.deps.head = Some(id);
                }
            }
        }
        match next {
            Some(n) => self.edge_mut(n).prev_dep = Some(id),
            None => {
                if let Some(node) = self.node_mut(consumer) {
                    node.deps.tail = Some(id);
                }
            }
        }
        if let Some(node) = self.node_mut(consumer) {
            node.deps.len += 1;
        }
    }

    fn detach_dep(&mut self, id: EdgeId) {
        let (consumer, prev, next) = {
            let edge = self.edge(id);
            (edge.consumer, edge.prev_dep, edge.next_dep)
        };
        match prev {
            Some(p) => self.edge_mut(p).next_dep = next,
            None => {
                if let Some(node) = self.node_mut(consumer) {
                    node.deps.head = next;
                }
            }
        }
        match next {
            Some(n) => self.edge_mut(n).prev_dep = prev,
            None => {
                if let Some(node) = self.node_mut(consumer) {
                    node.deps.tail = prev;
                }
            }
        }
        if let Some(node) = self.node_mut(consumer) {
            node.deps.len -= 1;
        }
        let edge = self.edge_mut(id);
        edge.prev_dep = None;
        edge.next_dep = None;
    }

    fn attach_sub(&mut self, producer: NodeId, id: EdgeId) {
        let Some(prev) = self.node(producer).map(|node| node.subs.tail) else {
            return;
        };
        {
            let edge = self.edge_mut(id);
            edge.prev_sub = prev;
            edge.next_sub = None;
        }
        if let Some(p) = prev {
            self.edge_mut(p).next_sub = Some(id);
        }
        if let Some(node) = self.node_mut(producer) {
            if prev.is_none() {
                node.subs.head = Some(id);
            }
            node.subs.tail = Some(id);
            node.subs.len += 1;
        }
    }

    fn detach_sub(&mut self, id: EdgeId) {
        let (producer, prev, next) = {
            let edge = self.edge(id);
            (edge.producer, edge.prev_sub, edge.next_sub)
        };
        match prev {
            Some(p) => self.edge_mut(p).next_sub = next,
            None => {
                if let Some(node) = self.node_mut(producer) {
                    node.subs.head = next;
                }
            }
        }
        match next {
            Some(n) => self.edge_mut(n).prev_sub = prev,
            None => {
                if let Some(node) = self.node_mut(producer) {
                    node.subs.tail = prev;
                }
            }
        }
        if let Some(node) = self.node_mut(producer) {
            node.subs.len -= 1;
        }
        let edge = self.edge_mut(id);
        edge.prev_sub = None;
        edge.next_sub = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    /// Run one "evaluation" of `consumer` that reads `reads` in order.
    fn evaluate(graph: &mut Graph, consumer: NodeId, reads: &[NodeId]) {
        let mut tail = None;
        for &producer in reads {
            tail = graph.link(producer, consumer, tail);
        }
        graph.trim_dependencies(consumer, tail);
    }

    fn setup(sources: usize) -> (Graph, Vec<NodeId>, NodeId) {
        let mut graph = Graph::new();
        let sources = (0..sources)
            .map(|_| graph.insert_node(NodeKind::Signal, None))
            .collect();
        let consumer = graph.insert_node(NodeKind::Computed, None);
        (graph, sources, consumer)
    }

    #[test]
    fn link_creates_edges_in_read_order() {
        let (mut graph, s, c) = setup(3);
        evaluate(&mut graph, c, &[s[2], s[0], s[1]]);

        assert_eq!(graph.dependencies(c), vec![s[2], s[0], s[1]]);
        assert_eq!(graph.subscribers(s[0]), vec![c]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn duplicate_reads_share_one_edge() {
        let (mut graph, s, c) = setup(2);
        evaluate(&mut graph, c, &[s[0], s[0], s[1], s[0]]);

        assert_eq!(graph.dependencies(c), vec![s[0], s[1]]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node(s[0]).map(|n| n.subscriber_count()), Some(1));
    }

    #[test]
    fn stable_reads_reuse_edges() {
        let (mut graph, s, c) = setup(2);
        evaluate(&mut graph, c, &[s[0], s[1]]);
        let before = graph.node(c).and_then(|n| n.deps.head);

        evaluate(&mut graph, c, &[s[0], s[1]]);
        assert_eq!(graph.node(c).and_then(|n| n.deps.head), before);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn reordered_reads_move_edges() {
        let (mut graph, s, c) = setup(3);
        evaluate(&mut graph, c, &[s[0], s[1], s[2]]);
        evaluate(&mut graph, c, &[s[2], s[0]]);

        assert_eq!(graph.dependencies(c), vec![s[2], s[0]]);
        assert!(graph.subscribers(s[1]).is_empty());
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn link_refreshes_cached_version() {
        let (mut graph, s, c) = setup(1);
        evaluate(&mut graph, c, &[s[0]]);
        if let Some(node) = graph.node_mut(s[0]) {
            node.version = 7;
        }
        evaluate(&mut graph, c, &[s[0]]);

        let head = graph.node(c).and_then(|n| n.deps.head).unwrap();
        assert_eq!(graph.edge(head).version(), 7);
    }

    #[test]
    fn sever_removes_both_directions() {
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let m = graph.insert_node(NodeKind::Computed, None);
        let e = graph.insert_node(NodeKind::Effect, None);
        evaluate(&mut graph, m, &[s]);
        evaluate(&mut graph, e, &[m, s]);

        graph.sever(m);
        assert!(graph.dependencies(m).is_empty());
        assert!(graph.subscribers(m).is_empty());
        assert_eq!(graph.dependencies(e), vec![s]);
        assert_eq!(graph.subscribers(s), vec![e]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn freed_edges_are_reused() {
        let (mut graph, s, c) = setup(2);
        evaluate(&mut graph, c, &[s[0]]);
        evaluate(&mut graph, c, &[]);
        evaluate(&mut graph, c, &[s[1]]);
        assert_eq!(graph.edge_slots(), 1);
        assert_eq!(graph.dependencies(c), vec![s[1]]);
    }

    #[test]
    fn linking_a_dead_node_is_ignored() {
        let (mut graph, s, c) = setup(1);
        graph.remove_node(s[0]);
        assert_eq!(graph.link(s[0], c, None), None);
        assert_eq!(graph.edge_count(), 0);
    }
}
