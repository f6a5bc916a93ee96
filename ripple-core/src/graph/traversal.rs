//! Graph Traversal
//!
//! A depth-first walk over the consumer side of the graph, driven by a
//! [`Visitor`]. The walk keeps its own worklist instead of recursing, so a
//! long chain of computeds cannot overflow the stack while marking.
//!
//! Subscribers are visited in subscription order and each visited node is
//! offered to the visitor before any of its own subscribers (pre-order). The
//! traversal itself does not deduplicate: a node reachable along two paths is
//! offered twice, and it is up to the visitor to answer [`Visit::Skip`] the
//! second time.

use smallvec::SmallVec;

use super::arena::Graph;
use super::edge::EdgeId;
use super::node::{Node, NodeId};

/// What the walk should do after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Continue into the node's subscribers.
    Descend,
    /// Do not look at the node's subscribers.
    Skip,
}

/// Callback invoked for every consumer reached by a walk.
pub trait Visitor {
    /// Visit `node`. `direct` is true when it subscribes to the walk's root.
    fn visit(&mut self, id: NodeId, node: &mut Node, direct: bool) -> Visit;
}

impl<F> Visitor for F
where
    F: FnMut(NodeId, &mut Node, bool) -> Visit,
{
    fn visit(&mut self, id: NodeId, node: &mut Node, direct: bool) -> Visit {
        self(id, node, direct)
    }
}

impl Graph {
    /// Walk every consumer reachable from `root`.
    ///
    /// Returns the number of visits made.
    pub fn walk_subscribers<V>(&mut self, root: NodeId, visitor: &mut V) -> usize
    where
        V: Visitor + ?Sized,
    {
        // Each entry is the next subscriber edge to follow at one level.
        let mut stack: SmallVec<[(EdgeId, bool); 16]> = SmallVec::new();
        if let Some(head) = self.node(root).and_then(|node| node.subs.head) {
            stack.push((head, true));
        }

        let mut visits = 0;
        while let Some(&(edge_id, direct)) = stack.last() {
            let (consumer, next) = {
                let edge = self.edge(edge_id);
                (edge.consumer, edge.next_sub)
            };
            match next {
                Some(next) => {
                    if let Some(top) = stack.last_mut() {
                        top.0 = next;
                    }
                }
                None => {
                    stack.pop();
                }
            }

            let Some(node) = self.node_mut(consumer) else {
                continue;
            };
            visits += 1;
            if visitor.visit(consumer, node, direct) == Visit::Descend {
                if let Some(head) = node.subs.head {
                    stack.push((head, false));
                }
            }
        }
        visits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn link(graph: &mut Graph, consumer: NodeId, producers: &[NodeId]) {
        let mut tail = None;
        for &p in producers {
            tail = graph.link(p, consumer, tail);
        }
    }

    #[test]
    fn walks_depth_first_in_subscription_order() {
        // s -> a -> c
        // s -> b
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let a = graph.insert_node(NodeKind::Computed, None);
        let b = graph.insert_node(NodeKind::Effect, None);
        let c = graph.insert_node(NodeKind::Effect, None);
        link(&mut graph, a, &[s]);
        link(&mut graph, b, &[s]);
        link(&mut graph, c, &[a]);

        let mut order = Vec::new();
        graph.walk_subscribers(s, &mut |id: NodeId, _: &mut Node, direct: bool| {
            order.push((id, direct));
            Visit::Descend
        });
        assert_eq!(order, vec![(a, true), (c, false), (b, true)]);
    }

    #[test]
    fn skip_prunes_the_subtree() {
        let mut graph = Graph::new();
        let s = graph.insert_node(NodeKind::Signal, None);
        let a = graph.insert_node(NodeKind::Computed, None);
        let c = graph.insert_node(NodeKind::Effect, None);
        link(&mut graph, a, &[s]);
        link(&mut graph, c, &[a]);

        let mut skip = |_: NodeId, _: &mut Node, _: bool| Visit::Skip;
        let visits = graph.walk_subscribers(s, &mut skip);
        assert_eq!(visits, 1);
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let mut graph = Graph::new();
        let root = graph.insert_node(NodeKind::Signal, None);
        let mut prev = root;
        for _ in 0..10_000 {
            let next = graph.insert_node(NodeKind::Computed, None);
            link(&mut graph, next, &[prev]);
            prev = next;
        }
        let mut descend = |_: NodeId, _: &mut Node, _: bool| Visit::Descend;
        let visits = graph.walk_subscribers(root, &mut descend);
        assert_eq!(visits, 10_000);
    }
}
