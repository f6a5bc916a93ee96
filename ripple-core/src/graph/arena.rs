//! Node and Edge Arenas
//!
//! The graph owns every node and every edge. Nodes sit in a generational
//! slot arena, edges in a plain slot arena with a free list; producers and
//! consumers refer to each other only through [`NodeId`] and [`EdgeId`].

use super::edge::{Edge, EdgeId};
use super::node::{Node, NodeId, NodeKind};
use super::owner::ScopeId;

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The dependency graph: node arena, edge arena and the global version.
#[derive(Debug, Default)]
pub struct Graph {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    edges: Vec<Option<Edge>>,
    free_edges: Vec<u32>,
    live_nodes: usize,
    live_edges: usize,
    global_version: u64,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id.
    pub fn insert_node(&mut self, kind: NodeKind, owner: Option<ScopeId>) -> NodeId {
        let mut node = Node::new(kind, owner);
        node.checkpoint = self.global_version;
        self.live_nodes += 1;

        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    /// Remove a node, freeing its slot for reuse.
    ///
    /// The caller must have severed the node's edges first.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        debug_assert!(node.deps.is_empty() && node.subs.is_empty());
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(id.index());
        self.live_nodes -= 1;
        Some(node)
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Get a reference to a live node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    /// Get a mutable reference to a live node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    /// Ids of all live nodes, in slot order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.is_some())
            .map(|(index, slot)| NodeId::new(index as u32, slot.generation))
            .collect()
    }

    /// Get an edge. Edge ids reachable from live nodes are always valid.
    pub(crate) fn edge(&self, id: EdgeId) -> &Edge {
        self.edges[id.index()]
            .as_ref()
            .expect("edge list points at a freed edge")
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges[id.index()]
            .as_mut()
            .expect("edge list points at a freed edge")
    }

    pub(crate) fn alloc_edge(&mut self, edge: Edge) -> EdgeId {
        self.live_edges += 1;
        if let Some(index) = self.free_edges.pop() {
            self.edges[index as usize] = Some(edge);
            return EdgeId::new(index);
        }
        let index = self.edges.len() as u32;
        self.edges.push(Some(edge));
        EdgeId::new(index)
    }

    pub(crate) fn free_edge(&mut self, id: EdgeId) -> Edge {
        let edge = self.edges[id.index()]
            .take()
            .expect("edge freed twice");
        self.free_edges.push(id.index() as u32);
        self.live_edges -= 1;
        edge
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.live_nodes
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.live_edges
    }

    /// The global version: bumped once per top-level write or batch that
    /// changed at least one signal.
    pub fn global_version(&self) -> u64 {
        self.global_version
    }

    pub(crate) fn bump_global_version(&mut self) -> u64 {
        self.global_version += 1;
        self.global_version
    }

    #[cfg(test)]
    pub(crate) fn edge_slots(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();

        let id1 = graph.insert_node(NodeKind::Signal, None);
        let id2 = graph.insert_node(NodeKind::Computed, None);
        assert_eq!(graph.node_count(), 2);

        assert!(graph.remove_node(id1).is_some());
        assert_eq!(graph.node_count(), 1);
        assert!(graph.node(id1).is_none());
        assert!(graph.node(id2).is_some());

        // Removing again is a no-op
        assert!(graph.remove_node(id1).is_none());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn reused_slots_get_a_new_generation() {
        let mut graph = Graph::new();
        let old = graph.insert_node(NodeKind::Signal, None);
        graph.remove_node(old);

        let new = graph.insert_node(NodeKind::Effect, None);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(!graph.contains(old));
        assert_eq!(graph.node(new).map(Node::kind), Some(NodeKind::Effect));
    }

    #[test]
    fn node_ids_lists_live_nodes() {
        let mut graph = Graph::new();
        let a = graph.insert_node(NodeKind::Signal, None);
        let b = graph.insert_node(NodeKind::Signal, None);
        let c = graph.insert_node(NodeKind::Signal, None);
        graph.remove_node(b);
        assert_eq!(graph.node_ids(), vec![a, c]);
    }

    #[test]
    fn new_nodes_start_at_the_global_version() {
        let mut graph = Graph::new();
        graph.bump_global_version();
        graph.bump_global_version();
        let id = graph.insert_node(NodeKind::Computed, None);
        assert_eq!(graph.node(id).map(|n| n.checkpoint), Some(2));
    }
}
