//! Ownership Scopes
//!
//! A scope groups nodes that are torn down together, such as everything a
//! view layer created for one subtree. Scopes nest: a scope created while
//! another is active becomes its child and is disposed with it.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::node::NodeId;

/// Identifier of an ownership scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Default)]
struct ScopeEntry {
    parent: Option<ScopeId>,
    nodes: SmallVec<[NodeId; 8]>,
    children: SmallVec<[ScopeId; 4]>,
}

/// What a scope owned at the moment it was released.
#[derive(Debug, Default)]
pub struct ScopeContents {
    /// Owned nodes, in creation order.
    pub nodes: Vec<NodeId>,
    /// Child scopes, in creation order.
    pub children: Vec<ScopeId>,
}

/// Registry of live scopes.
#[derive(Debug, Default)]
pub struct Scopes {
    entries: HashMap<ScopeId, ScopeEntry>,
    next: u32,
}

impl Scopes {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope, optionally as a child of `parent`.
    pub fn create(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.next);
        self.next += 1;

        let parent = parent.filter(|p| self.entries.contains_key(p));
        if let Some(entry) = parent.and_then(|p| self.entries.get_mut(&p)) {
            entry.children.push(id);
        }
        self.entries.insert(
            id,
            ScopeEntry {
                parent,
                ..ScopeEntry::default()
            },
        );
        id
    }

    /// Whether `scope` is still live.
    pub fn contains(&self, scope: ScopeId) -> bool {
        self.entries.contains_key(&scope)
    }

    /// Record that `scope` owns `node`. Returns false if the scope is gone.
    pub fn adopt(&mut self, scope: ScopeId, node: NodeId) -> bool {
        match self.entries.get_mut(&scope) {
            Some(entry) => {
                entry.nodes.push(node);
                true
            }
            None => false,
        }
    }

    /// Forget `node` after it was disposed on its own.
    pub fn release_node(&mut self, scope: ScopeId, node: NodeId) {
        if let Some(entry) = self.entries.get_mut(&scope) {
            if let Some(pos) = entry.nodes.iter().position(|n| *n == node) {
                entry.nodes.remove(pos);
            }
        }
    }

    /// Remove `scope` from the registry and its parent, returning what it owned.
    pub fn take(&mut self, scope: ScopeId) -> Option<ScopeContents> {
        let entry = self.entries.remove(&scope)?;
        if let Some(parent) = entry.parent.and_then(|p| self.entries.get_mut(&p)) {
            parent.children.retain(|c| *c != scope);
        }
        Some(ScopeContents {
            nodes: entry.nodes.into_vec(),
            children: entry.children.into_vec(),
        })
    }

    /// Ids of every live scope without a live parent.
    pub fn roots(&self) -> Vec<ScopeId> {
        let mut roots: Vec<ScopeId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.parent.is_none())
            .map(|(id, _)| *id)
            .collect();
        roots.sort();
        roots
    }

    /// Number of live scopes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no live scopes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
