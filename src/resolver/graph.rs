// src/resolver/graph.rs

//! Ordering graph for the action plan
//!
//! Nodes are packages taking part in one kind of action; an edge
//! `from -> to` says `from` needs `to`. [`OrderGraph::topological_sort`]
//! returns dependencies before their dependents and never fails: when only
//! cycles remain, the lowest package id among them is emitted next.

use crate::cache::PkgId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Default)]
pub struct OrderGraph {
    nodes: BTreeSet<PkgId>,
    /// Package -> packages it needs
    edges: BTreeMap<PkgId, BTreeSet<PkgId>>,
    /// Package -> packages needing it
    reverse_edges: BTreeMap<PkgId, BTreeSet<PkgId>>,
}

impl OrderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, pkg: PkgId) {
        self.nodes.insert(pkg);
    }

    pub fn nodes(&self) -> impl Iterator<Item = PkgId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn contains(&self, pkg: PkgId) -> bool {
        self.nodes.contains(&pkg)
    }

    /// Record that `from` needs `to`; self edges and unknown nodes are ignored
    pub fn add_edge(&mut self, from: PkgId, to: PkgId) {
        if from == to || !self.contains(from) || !self.contains(to) {
            return;
        }
        self.edges.entry(from).or_default().insert(to);
        self.reverse_edges.entry(to).or_default().insert(from);
    }

    pub fn dependencies(&self, pkg: PkgId) -> impl Iterator<Item = PkgId> + '_ {
        self.edges.get(&pkg).into_iter().flatten().copied()
    }

    pub fn dependents(&self, pkg: PkgId) -> impl Iterator<Item = PkgId> + '_ {
        self.reverse_edges.get(&pkg).into_iter().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm: dependencies first, ties by ascending id
    pub fn topological_sort(&self) -> Vec<PkgId> {
        let mut pending: BTreeMap<PkgId, usize> = self
            .nodes
            .iter()
            .map(|&n| (n, self.dependencies(n).count()))
            .collect();
        let mut ready: BTreeSet<PkgId> = pending
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut cycles_broken = 0usize;

        while !pending.is_empty() {
            let next = match ready.pop_first() {
                Some(n) => n,
                None => {
                    // only cycles left
                    let Some((&lowest, _)) = pending.first_key_value() else {
                        break;
                    };
                    cycles_broken += 1;
                    lowest
                }
            };
            if pending.remove(&next).is_none() {
                continue;
            }
            result.push(next);

            for dependent in self.dependents(next) {
                if let Some(degree) = pending.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if cycles_broken > 0 {
            debug!("Broke {} dependency cycles while ordering", cycles_broken);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[u32], edges: &[(u32, u32)]) -> OrderGraph {
        let mut g = OrderGraph::new();
        for &n in nodes {
            g.add_node(PkgId(n));
        }
        for &(a, b) in edges {
            g.add_edge(PkgId(a), PkgId(b));
        }
        g
    }

    fn ids(order: Vec<PkgId>) -> Vec<u32> {
        order.into_iter().map(|p| p.0).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        // 1 needs 2, 2 needs 3
        let g = graph(&[1, 2, 3], &[(1, 2), (2, 3)]);
        assert_eq!(ids(g.topological_sort()), vec![3, 2, 1]);
    }

    #[test]
    fn test_independent_nodes_by_id() {
        let g = graph(&[5, 2, 9], &[]);
        assert_eq!(ids(g.topological_sort()), vec![2, 5, 9]);
    }

    #[test]
    fn test_cycle_broken_at_lowest_id() {
        // 4 -> 7 -> 4, and 9 needs 4
        let g = graph(&[4, 7, 9], &[(4, 7), (7, 4), (9, 4)]);
        assert_eq!(ids(g.topological_sort()), vec![4, 7, 9]);
    }

    #[test]
    fn test_edges_to_unknown_nodes_ignored() {
        let g = graph(&[1], &[(1, 2), (1, 1)]);
        assert_eq!(g.dependencies(PkgId(1)).count(), 0);
        assert_eq!(ids(g.topological_sort()), vec![1]);
    }
}
