//! Typed self-reference graph and canonical union-find.
//!
//! Agents and entries point at other rows of their own kind:
//!
//! | Edge | From | To |
//! |------|------|----|
//! | [`EdgeKind::CanonicalOf`] | a duplicate | the record it was merged into |
//! | [`EdgeKind::TranslationOf`] | a translated entry | its original |
//!
//! [`EntityGraph`] holds any mix of these edges in arena-indexed adjacency
//! lists so traversals (variant collection, cycle checks) are written once
//! for every entity kind. [`CanonicalForest`] is the union-find used
//! when merging: unlike a rank-balanced union-find, the caller names the
//! representative of every union, because the operator chose which record
//! survives.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    CanonicalOf,
    TranslationOf,
}

/// Directed multigraph over row ids with typed edges.
#[derive(Debug, Default, Clone)]
pub struct EntityGraph {
    index: HashMap<i64, usize>,
    ids: Vec<i64>,
    out: Vec<Vec<(EdgeKind, usize)>>,
    incoming: Vec<Vec<(EdgeKind, usize)>>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena slot for `id`, allocating one on first sight.
    pub fn add_node(&mut self, id: i64) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }
        let slot = self.ids.len();
        self.ids.push(id);
        self.out.push(Vec::new());
        self.incoming.push(Vec::new());
        self.index.insert(id, slot);
        slot
    }

    pub fn add_edge(&mut self, kind: EdgeKind, from: i64, to: i64) {
        let f = self.add_node(from);
        let t = self.add_node(to);
        if !self.out[f].contains(&(kind, t)) {
            self.out[f].push((kind, t));
            self.incoming[t].push((kind, f));
        }
    }

    /// Targets of `id`'s outgoing edges of `kind`.
    pub fn targets(&self, id: i64, kind: EdgeKind) -> Vec<i64> {
        self.walk(&self.out, id, kind)
    }

    /// Rows whose `kind` edge points at `id`.
    pub fn sources(&self, id: i64, kind: EdgeKind) -> Vec<i64> {
        self.walk(&self.incoming, id, kind)
    }

    fn walk(&self, adjacency: &[Vec<(EdgeKind, usize)>], id: i64, kind: EdgeKind) -> Vec<i64> {
        match self.index.get(&id) {
            Some(&slot) => adjacency[slot]
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, t)| self.ids[*t])
                .collect(),
            None => Vec::new(),
        }
    }

    /// All rows reachable from `id` against the edge direction, `id`
    /// excluded. For [`EdgeKind::CanonicalOf`] this is every variant,
    /// however deep.
    pub fn descendants(&self, id: i64, kind: EdgeKind) -> Vec<i64> {
        let mut seen = HashSet::from([id]);
        let mut stack = vec![id];
        let mut found = Vec::new();
        while let Some(current) = stack.pop() {
            for source in self.sources(current, kind) {
                if seen.insert(source) {
                    found.push(source);
                    stack.push(source);
                }
            }
        }
        found.sort_unstable();
        found
    }

    /// Would adding `from -> to` as a `kind` edge close a cycle?
    pub fn would_cycle(&self, kind: EdgeKind, from: i64, to: i64) -> bool {
        if from == to {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![to];
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.targets(current, kind));
            }
        }
        false
    }
}

/// Union-find over row ids with path compression and caller-chosen roots.
#[derive(Debug, Default, Clone)]
pub struct CanonicalForest {
    index: HashMap<i64, usize>,
    ids: Vec<i64>,
    parent: Vec<usize>,
}

impl CanonicalForest {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, id: i64) -> usize {
        if let Some(&slot) = self.index.get(&id) {
            return slot;
        }
        let slot = self.ids.len();
        self.ids.push(id);
        self.parent.push(slot);
        self.index.insert(id, slot);
        slot
    }

    fn find_slot(&mut self, slot: usize) -> usize {
        let mut root = slot;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        let mut current = slot;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merge `member`'s set into `root`'s set, keeping `root`'s
    /// representative.
    pub fn union_into(&mut self, root: i64, member: i64) {
        let r = self.insert(root);
        let m = self.insert(member);
        let r = self.find_slot(r);
        let m = self.find_slot(m);
        if r != m {
            self.parent[m] = r;
        }
    }

    /// Make `id` the representative of its set.
    pub fn promote(&mut self, id: i64) {
        let slot = self.insert(id);
        let root = self.find_slot(slot);
        if root != slot {
            self.parent[root] = slot;
            self.parent[slot] = slot;
        }
    }

    /// Every known id paired with the pointer it should carry: `None` for
    /// roots, the root otherwise. Sorted by id.
    pub fn flatten(&mut self) -> Vec<(i64, Option<i64>)> {
        let mut out: Vec<(i64, Option<i64>)> = (0..self.ids.len())
            .map(|slot| {
                let root = self.find_slot(slot);
                let pointer = if root == slot { None } else { Some(self.ids[root]) };
                (self.ids[slot], pointer)
            })
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendants_are_transitive() {
        let mut g = EntityGraph::new();
        g.add_edge(EdgeKind::CanonicalOf, 1, 2);
        g.add_edge(EdgeKind::CanonicalOf, 2, 3);
        g.add_edge(EdgeKind::CanonicalOf, 4, 3);
        assert_eq!(g.descendants(3, EdgeKind::CanonicalOf), vec![1, 2, 4]);
        assert!(g.descendants(1, EdgeKind::CanonicalOf).is_empty());
    }

    #[test]
    fn test_would_cycle() {
        let mut g = EntityGraph::new();
        g.add_edge(EdgeKind::TranslationOf, 1, 2);
        assert!(g.would_cycle(EdgeKind::TranslationOf, 2, 1));
        assert!(g.would_cycle(EdgeKind::TranslationOf, 5, 5));
        assert!(!g.would_cycle(EdgeKind::TranslationOf, 3, 1));
    }

    #[test]
    fn test_forest_keeps_chosen_root() {
        let mut f = CanonicalForest::new();
        f.union_into(10, 1);
        f.union_into(10, 2);
        f.union_into(2, 3);
        assert_eq!(
            f.flatten(),
            vec![(1, Some(10)), (2, Some(10)), (3, Some(10)), (10, None)]
        );

        f.promote(3);
        assert_eq!(
            f.flatten(),
            vec![(1, Some(3)), (2, Some(3)), (3, None), (10, Some(3))]
        );
    }

    #[test]
    fn test_forest_flattens_to_root() {
        // 1 -> 2 -> 3, 4 -> 3
        let mut f = CanonicalForest::new();
        f.union_into(2, 1);
        f.union_into(3, 2);
        f.union_into(3, 4);
        assert_eq!(
            f.flatten(),
            vec![(1, Some(3)), (2, Some(3)), (3, None), (4, Some(3))]
        );
    }

    #[test]
    fn test_descendants_ignore_other_edge_kinds() {
        let mut g = EntityGraph::new();
        g.add_edge(EdgeKind::CanonicalOf, 1, 3);
        g.add_edge(EdgeKind::TranslationOf, 2, 3);
        assert_eq!(g.descendants(3, EdgeKind::CanonicalOf), vec![1]);
        assert_eq!(g.descendants(3, EdgeKind::TranslationOf), vec![2]);
        assert_eq!(g.targets(1, EdgeKind::CanonicalOf), vec![3]);
        assert!(g.targets(1, EdgeKind::TranslationOf).is_empty());
    }
}
