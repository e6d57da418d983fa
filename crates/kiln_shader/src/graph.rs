//! Include dependency graph.
//!
//! Every live [`ShaderSource`](crate::source::ShaderSource) owns one node of
//! a `slotmap` arena. Edges are stored on both ends: `includes` lists the
//! files a source pulls in, `dependents` the sources that pull it in. Both
//! sides are only ever updated together, under the graph lock, so
//! `a ∈ b.includes ⇔ b ∈ a.dependents` always holds.
//!
//! Nodes hold weak references back to their sources. The graph never keeps a
//! source alive.

use rustc_hash::FxHashSet;
use slotmap::{SlotMap, new_key_type};
use std::sync::Weak;

use kiln_resources::Resource;

use crate::source::ShaderSource;

new_key_type! {
    /// Arena key of a shader source node.
    pub struct SourceKey;
}

pub(crate) type SourceRef = Weak<Resource<ShaderSource>>;

struct Node {
    name: String,
    source: SourceRef,
    includes: FxHashSet<SourceKey>,
    dependents: FxHashSet<SourceKey>,
    invalidated: bool,
}

#[derive(Default)]
pub struct DependencyGraph {
    nodes: SlotMap<SourceKey, Node>,
}

impl DependencyGraph {
    pub(crate) fn insert(&mut self, name: &str, source: SourceRef) -> SourceKey {
        self.nodes.insert(Node {
            name: name.to_string(),
            source,
            includes: FxHashSet::default(),
            dependents: FxHashSet::default(),
            invalidated: false,
        })
    }

    /// Removes a node and unlinks it from both sides of every edge.
    pub(crate) fn remove(&mut self, key: SourceKey) {
        let Some(node) = self.nodes.remove(key) else {
            return;
        };
        for include in node.includes {
            if let Some(target) = self.nodes.get_mut(include) {
                target.dependents.remove(&key);
            }
        }
        for dependent in node.dependents {
            if let Some(owner) = self.nodes.get_mut(dependent) {
                owner.includes.remove(&key);
            }
        }
    }

    /// Records that `from` includes `to`.
    pub(crate) fn link(&mut self, from: SourceKey, to: SourceKey) -> bool {
        if !self.nodes.contains_key(from) || !self.nodes.contains_key(to) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(from) {
            node.includes.insert(to);
        }
        if let Some(node) = self.nodes.get_mut(to) {
            node.dependents.insert(from);
        }
        true
    }

    /// Drops every outgoing edge of `from`, typically before reprocessing.
    pub(crate) fn unlink_includes(&mut self, from: SourceKey) {
        let Some(node) = self.nodes.get_mut(from) else {
            return;
        };
        let includes = std::mem::take(&mut node.includes);
        for include in includes {
            if let Some(target) = self.nodes.get_mut(include) {
                target.dependents.remove(&from);
            }
        }
    }

    /// Marks `start` and every transitive dependent as invalidated.
    ///
    /// Nodes that are already invalidated are not expanded again, so each
    /// node is visited at most once per change, diamonds included. Returns
    /// the sources that were newly marked.
    pub(crate) fn invalidate_closure(&mut self, start: SourceKey) -> Vec<SourceRef> {
        let mut marked = Vec::new();
        let mut pending = vec![start];
        while let Some(key) = pending.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            if node.invalidated {
                continue;
            }
            node.invalidated = true;
            marked.push(node.source.clone());
            pending.extend(node.dependents.iter().copied());
        }
        marked
    }

    pub(crate) fn clear_invalidated(&mut self, key: SourceKey) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.invalidated = false;
        }
    }

    #[must_use]
    pub fn is_invalidated(&self, key: SourceKey) -> bool {
        self.nodes.get(key).is_some_and(|n| n.invalidated)
    }

    #[must_use]
    pub fn includes(&self, key: SourceKey) -> Vec<SourceKey> {
        self.nodes
            .get(key)
            .map(|n| n.includes.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn dependents(&self, key: SourceKey) -> Vec<SourceKey> {
        self.nodes
            .get(key)
            .map(|n| n.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self, key: SourceKey) -> Option<&str> {
        self.nodes.get(key).map(|n| n.name.as_str())
    }

    #[must_use]
    pub fn contains(&self, key: SourceKey) -> bool {
        self.nodes.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Checks that every edge is recorded on both of its ends.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|(key, node)| {
            node.includes.iter().all(|inc| {
                self.nodes
                    .get(*inc)
                    .is_some_and(|target| target.dependents.contains(&key))
            }) && node.dependents.iter().all(|dep| {
                self.nodes
                    .get(*dep)
                    .is_some_and(|owner| owner.includes.contains(&key))
            })
        })
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
