#![forbid(unsafe_code)]

//! Dependency graph over container-scoped patterns.
//!
//! # Design
//!
//! Two edge kinds are kept apart:
//!
//! - **static** edges run from a pattern to each registered child pattern
//!   (`items` → `items.*` → `items.*.name`) plus any explicit structural
//!   binding added by the host.
//! - **dynamic** edges run from a pattern read by a computed value to that
//!   computed pattern.
//!
//! A pattern is marked as a *list* when a child ending in the wildcard was
//! registered under it; walks expand list patterns through the diff engine.
//!
//! # Invariants
//!
//! 1. Edges are deduplicated: adding an existing edge returns `false`.
//! 2. `register_pattern` adds parent→child static edges for every ancestor
//!    and stops at the first edge that already existed.
//! 3. Dependents are returned in insertion order.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use strand_core::{AbsolutePattern, AddressSpace};

type Edges = SmallVec<[AbsolutePattern; 4]>;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    statics: AHashMap<AbsolutePattern, Edges>,
    dynamics: AHashMap<AbsolutePattern, Edges>,
    lists: AHashSet<AbsolutePattern>,
}

fn add_edge(map: &mut AHashMap<AbsolutePattern, Edges>, from: &AbsolutePattern, to: &AbsolutePattern) -> bool {
    let edges = map.entry(from.clone()).or_default();
    if edges.contains(to) {
        return false;
    }
    edges.push(to.clone());
    true
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural edge: changes of `parent` reach `child`.
    pub fn add_static_dependency(&mut self, parent: &AbsolutePattern, child: &AbsolutePattern) -> bool {
        add_edge(&mut self.statics, parent, child)
    }

    /// Computed edge: `target` was derived from a read of `source`.
    pub fn add_dynamic_dependency(&mut self, source: &AbsolutePattern, target: &AbsolutePattern) -> bool {
        add_edge(&mut self.dynamics, source, target)
    }

    /// Link `pattern` into the static tree under its ancestors.
    ///
    /// Returns the number of edges added.
    pub fn register_pattern(&mut self, space: &AddressSpace, pattern: &AbsolutePattern) -> usize {
        let mut added = 0;
        let mut current = pattern.clone();
        while let Some(parent) = current.pattern().parent() {
            let parent = space.absolute_pattern(current.container(), parent);
            if current.pattern().is_element() {
                self.lists.insert(parent.clone());
            }
            if !self.add_static_dependency(&parent, &current) {
                break;
            }
            added += 1;
            current = parent;
        }
        added
    }

    #[must_use]
    pub fn static_dependents(&self, pattern: &AbsolutePattern) -> &[AbsolutePattern] {
        self.statics.get(pattern).map_or(&[][..], SmallVec::as_slice)
    }

    #[must_use]
    pub fn dynamic_dependents(&self, pattern: &AbsolutePattern) -> &[AbsolutePattern] {
        self.dynamics.get(pattern).map_or(&[][..], SmallVec::as_slice)
    }

    /// Whether `pattern` owns a wildcard child.
    #[must_use]
    pub fn is_list(&self, pattern: &AbsolutePattern) -> bool {
        self.lists.contains(pattern)
    }

    pub fn mark_list(&mut self, pattern: &AbsolutePattern) {
        self.lists.insert(pattern.clone());
    }

    /// Total static and dynamic edge counts.
    #[must_use]
    pub fn edge_counts(&self) -> (usize, usize) {
        let count = |map: &AHashMap<AbsolutePattern, Edges>| -> usize {
            map.values().map(SmallVec::len).sum()
        };
        (count(&self.statics), count(&self.dynamics))
    }

    /// Drop every edge touching `container`.
    pub fn evict_container(&mut self, container: &str) {
        for map in [&mut self.statics, &mut self.dynamics] {
            map.retain(|from, _| from.container() != container);
            for edges in map.values_mut() {
                edges.retain(|to| to.container() != container);
            }
            map.retain(|_, edges| !edges.is_empty());
        }
        self.lists.retain(|p| p.container() != container);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs(space: &AddressSpace, path: &str) -> AbsolutePattern {
        let pattern = space.intern_pattern(path).unwrap();
        space.absolute_pattern("app", &pattern)
    }

    #[test]
    fn register_links_every_ancestor_once() {
        let space = AddressSpace::new();
        let mut graph = DependencyGraph::new();
        let name = abs(&space, "items.*.name");
        assert_eq!(graph.register_pattern(&space, &name), 2);
        assert_eq!(graph.static_dependents(&abs(&space, "items.*")), &[name.clone()]);
        assert!(graph.is_list(&abs(&space, "items")));
        assert!(!graph.is_list(&abs(&space, "items.*")));

        // Sibling registration stops at the shared `items.*` edge.
        let price = abs(&space, "items.*.price");
        assert_eq!(graph.register_pattern(&space, &price), 1);
        assert_eq!(graph.static_dependents(&abs(&space, "items.*")).len(), 2);
        assert_eq!(graph.register_pattern(&space, &price), 0);
    }

    #[test]
    fn edges_are_deduplicated() {
        let space = AddressSpace::new();
        let mut graph = DependencyGraph::new();
        let a = abs(&space, "a");
        let b = abs(&space, "b");
        assert!(graph.add_dynamic_dependency(&a, &b));
        assert!(!graph.add_dynamic_dependency(&a, &b));
        assert!(graph.add_static_dependency(&a, &b));
        assert_eq!(graph.edge_counts(), (1, 1));
        assert!(graph.dynamic_dependents(&b).is_empty());
    }

    #[test]
    fn evicting_a_container_drops_its_edges() {
        let space = AddressSpace::new();
        let mut graph = DependencyGraph::new();
        let local = abs(&space, "total");
        let pattern = space.intern_pattern("price").unwrap();
        let remote = space.absolute_pattern("other", &pattern);
        graph.add_dynamic_dependency(&remote, &local);
        graph.register_pattern(&space, &abs(&space, "rows.*"));
        graph.evict_container("other");
        assert_eq!(graph.edge_counts(), (1, 0));
        graph.evict_container("app");
        assert_eq!(graph.edge_counts(), (0, 0));
        assert!(!graph.is_list(&abs(&space, "rows")));
    }
}
