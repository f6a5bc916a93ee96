//! Dependency Graph
//!
//! This module implements the data structures behind the reactive runtime:
//! nodes, edges, the marking walk and the effect queue. It knows nothing
//! about values or user closures; the `reactive` module layers those on top.
//!
//! # Overview
//!
//! - Nodes represent signals, computeds and effects, addressed by [`NodeId`].
//! - Edges represent dependencies: if A reads B, one edge links producer B
//!   to consumer A. The edge also remembers B's version as A last saw it.
//!
//! When a signal changes, the [`Marker`] walks the graph from it and flags
//! every reachable consumer. The pull side then decides, per node, whether
//! anything it actually read is different before recomputing.
//!
//! # Design Decisions
//!
//! 1. Nodes and edges live in arenas addressed by index. An edge belongs to
//!    two intrusive lists at once (the consumer's dependencies and the
//!    producer's subscribers), and indices give O(1) insertion and removal
//!    without shared mutable references.
//!
//! 2. Node slots are generational, so stale ids from disposed handles are
//!    detected instead of aliasing a newer node.
//!
//! 3. Kind-specific behavior is a match on [`NodeKind`], not a trait
//!    hierarchy.

mod arena;
mod edge;
mod node;
mod owner;
mod scheduler;
mod traversal;

pub use arena::Graph;
pub use edge::{Edge, EdgeId, EdgeList};
pub use node::{Flags, Node, NodeId, NodeKind};
pub use owner::{ScopeContents, ScopeId, Scopes};
pub use scheduler::{Marker, Scheduler};
pub use traversal::{Visit, Visitor};
