//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::edge::EdgeList;
use super::owner::ScopeId;

/// Unique identifier for a node in the dependency graph.
///
/// Nodes live in a generational arena: `index` is the slot, `generation`
/// counts how many times the slot has been reused. An id kept by a handle
/// after its node was disposed never resolves to a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot of the node.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the node was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node. Signals only have subscribers, never dependencies.
    Signal,

    /// A derived node. Computeds have dependencies and may have subscribers.
    /// They cache their value and recompute lazily.
    Computed,

    /// An effect node. Effects are leaves: they have dependencies but
    /// produce side effects instead of values.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind can be read as a dependency.
    pub fn is_producer(self) -> bool {
        matches!(self, NodeKind::Signal | NodeKind::Computed)
    }

    /// Whether nodes of this kind track dependencies.
    pub fn is_consumer(self) -> bool {
        matches!(self, NodeKind::Computed | NodeKind::Effect)
    }

    fn as_str(self) -> &'static str {
        match self {
            NodeKind::Signal => "signal",
            NodeKind::Computed => "computed",
            NodeKind::Effect => "effect",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node state bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// No bits set.
    pub const NONE: Flags = Flags(0);

    /// The node is being evaluated. Re-entering it is a cycle.
    pub const RUNNING: Flags = Flags(1 << 0);

    /// A direct dependency changed value since the last evaluation.
    pub const OUTDATED: Flags = Flags(1 << 1);

    /// The node was reached by propagation and has not been validated since.
    /// Also the visited marker that keeps a marking pass from descending
    /// into the same node twice.
    pub const NOTIFIED: Flags = Flags(1 << 2);

    /// The body must run regardless of dependency versions: the node was
    /// never evaluated, or its last evaluation failed.
    pub const DIRTY: Flags = Flags(1 << 3);

    const NAMES: [(Flags, &'static str); 4] = [
        (Flags::RUNNING, "RUNNING"),
        (Flags::OUTDATED, "OUTDATED"),
        (Flags::NOTIFIED, "NOTIFIED"),
        (Flags::DIRTY, "DIRTY"),
    ];

    /// Raw bit representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set.
    pub fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Flags::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// What kind of node this is.
    kind: NodeKind,

    /// Current state bits.
    pub(crate) flags: Flags,

    /// Bumped whenever the node's value changes.
    pub(crate) version: u64,

    /// Global version at which the node was last validated.
    pub(crate) checkpoint: u64,

    /// Edges to the producers this node reads, in first-access order.
    pub(crate) deps: EdgeList,

    /// Edges to the consumers that read this node.
    pub(crate) subs: EdgeList,

    /// The scope that owns this node, if any.
    owner: Option<ScopeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind, owner: Option<ScopeId>) -> Self {
        Self {
            kind,
            flags: match kind {
                NodeKind::Signal => Flags::NONE,
                // Start dirty to ensure the first evaluation
                NodeKind::Computed | NodeKind::Effect => Flags::DIRTY,
            },
            version: 0,
            checkpoint: 0,
            deps: EdgeList::default(),
            subs: EdgeList::default(),
            owner,
        }
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current state bits.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Get the node's value version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The scope that owns this node.
    pub fn owner(&self) -> Option<ScopeId> {
        self.owner
    }

    /// Number of producers this node depends on.
    pub fn dependency_count(&self) -> usize {
        self.deps.len()
    }

    /// Number of consumers depending on this node.
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    /// Whether the node can skip validation entirely.
    pub(crate) fn is_settled(&self, global_version: u64) -> bool {
        !self
            .flags
            .intersects(Flags::OUTDATED | Flags::NOTIFIED | Flags::DIRTY)
            && self.checkpoint == global_version
    }
}
