//! Topological Ranker
//!
//! Assigns every node a column (rank 0 = sources) consistent with edge
//! direction and produces a total order for layout. Cycles are tolerated:
//! back-edges into the current traversal path are skipped, and any node no
//! traversal reached is used as the start of a fresh one. Ranks are the
//! longest paths over the remaining edges.
//!
//! Layout only; nothing here affects connection state.

use crate::presentation::{NodeKey, PresentationGraph};
use crate::types::{Directionality, PortKind};
use std::collections::{BTreeMap, BTreeSet};

/// A node as seen by the ranker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankNode<K> {
    pub key: K,
    pub name: String,
    /// Number of input ports (wired or not)
    pub inputs: usize,
    /// Number of output ports (wired or not)
    pub outputs: usize,
    /// Dominant port kind, for tie-breaking
    pub port_kind: PortKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked<K> {
    pub key: K,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Source,
    Sink,
    Interior,
}

#[derive(Debug, Clone, Default)]
pub struct TopologicalRanker<K> {
    nodes: Vec<RankNode<K>>,
    /// Children per node (self-loops dropped)
    adj: Vec<BTreeSet<usize>>,
    /// Distinct wired parents per node
    wired_in: Vec<usize>,
}

impl<K: Ord + Clone> TopologicalRanker<K> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            adj: Vec::new(),
            wired_in: Vec::new(),
        }
    }

    /// Add a node, returning its index for `add_edge`
    pub fn add_node(&mut self, node: RankNode<K>) -> usize {
        self.nodes.push(node);
        self.adj.push(BTreeSet::new());
        self.wired_in.push(0);
        self.nodes.len() - 1
    }

    /// Connection from node `from` to node `to`
    pub fn add_edge(&mut self, from: usize, to: usize) {
        if from == to || from >= self.nodes.len() || to >= self.nodes.len() {
            return;
        }
        if self.adj[from].insert(to) {
            self.wired_in[to] += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn classify(node: &RankNode<K>) -> Class {
        if node.inputs == 0 {
            Class::Source
        } else if node.outputs == 0 {
            Class::Sink
        } else {
            Class::Interior
        }
    }

    /// Rank every node and return them in layout order
    ///
    /// Order is by rank, then port kind, port count, name and key.
    pub fn rank(&self) -> Vec<Ranked<K>> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }

        let classes: Vec<Class> = self.nodes.iter().map(Self::classify).collect();
        let mut ranks: Vec<usize> = classes
            .iter()
            .map(|class| if *class == Class::Source { 0 } else { 1 })
            .collect();

        // Node indices in key order, for deterministic traversal
        let mut by_key: Vec<usize> = (0..n).collect();
        by_key.sort_by(|a, b| self.nodes[*a].key.cmp(&self.nodes[*b].key));
        let position: Vec<usize> = {
            let mut position = vec![0; n];
            for (pos, index) in by_key.iter().enumerate() {
                position[*index] = pos;
            }
            position
        };

        let children: Vec<Vec<usize>> = self
            .adj
            .iter()
            .map(|set| {
                let mut children: Vec<usize> = set.iter().copied().collect();
                children.sort_by_key(|child| position[*child]);
                children
            })
            .collect();

        let mut walk = Walk::new(n);
        for &start in by_key.iter().filter(|&&v| self.wired_in[v] == 0) {
            if !walk.visited[start] {
                walk.run(start, &children);
            }
        }

        // Whatever is left sits on a cycle nothing leads into
        for &start in &by_key {
            if !walk.visited[start] {
                log::trace!("[RANK] Breaking cycle at node #{}", start);
                walk.run(start, &children);
            }
        }

        // Reverse finishing order is topological once back-edges are gone
        for &node in walk.finished.iter().rev() {
            for &child in &walk.forward[node] {
                ranks[child] = ranks[child].max(ranks[node] + 1);
            }
        }

        let max_non_sink = (0..n)
            .filter(|&v| classes[v] != Class::Sink)
            .map(|v| ranks[v])
            .max()
            .unwrap_or(0);
        for v in 0..n {
            if classes[v] == Class::Sink {
                ranks[v] = ranks[v].max(max_non_sink + 1);
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let (na, nb) = (&self.nodes[a], &self.nodes[b]);
            ranks[a]
                .cmp(&ranks[b])
                .then(na.port_kind.cmp(&nb.port_kind))
                .then((na.inputs + na.outputs).cmp(&(nb.inputs + nb.outputs)))
                .then(na.name.cmp(&nb.name))
                .then(na.key.cmp(&nb.key))
        });
        order
            .into_iter()
            .map(|v| Ranked {
                key: self.nodes[v].key.clone(),
                rank: ranks[v],
            })
            .collect()
    }
}

/// Depth-first walk state shared by every traversal of one ranking
struct Walk {
    visited: Vec<bool>,
    /// On the stack of the traversal in progress
    on_path: Vec<bool>,
    /// Edges kept per node; edges back into the path are dropped
    forward: Vec<Vec<usize>>,
    finished: Vec<usize>,
}

impl Walk {
    fn new(n: usize) -> Self {
        Self {
            visited: vec![false; n],
            on_path: vec![false; n],
            forward: vec![Vec::new(); n],
            finished: Vec::with_capacity(n),
        }
    }

    /// Iterative DFS from `start`; each stack entry is (node, next child)
    fn run(&mut self, start: usize, children: &[Vec<usize>]) {
        self.visited[start] = true;
        self.on_path[start] = true;
        let mut stack = vec![(start, 0usize)];

        while let Some((node, cursor)) = stack.last_mut() {
            let node = *node;
            let Some(&child) = children[node].get(*cursor) else {
                stack.pop();
                self.on_path[node] = false;
                self.finished.push(node);
                continue;
            };
            *cursor += 1;

            if self.on_path[child] {
                continue;
            }
            self.forward[node].push(child);
            if !self.visited[child] {
                self.visited[child] = true;
                self.on_path[child] = true;
                stack.push((child, 0));
            }
        }
    }
}

/// Rank the nodes of a presentation graph
pub fn rank_presentation(graph: &PresentationGraph) -> Vec<Ranked<NodeKey>> {
    let mut ranker = TopologicalRanker::new();
    let mut index: BTreeMap<NodeKey, usize> = BTreeMap::new();

    for node in graph.nodes() {
        let ports: Vec<_> = graph.ports_of(&node.key).collect();
        let inputs = ports
            .iter()
            .filter(|port| port.key.mode == Directionality::Input)
            .count();
        let outputs = ports
            .iter()
            .filter(|port| port.key.mode == Directionality::Output)
            .count();
        let port_kind = ports
            .iter()
            .map(|port| port.kind)
            .min()
            .unwrap_or(PortKind::Other);
        let id = ranker.add_node(RankNode {
            key: node.key,
            name: node.label.clone(),
            inputs,
            outputs,
            port_kind,
        });
        index.insert(node.key, id);
    }

    for edge in graph.edges() {
        let from = graph.port_node(&edge.key.source).and_then(|n| index.get(&n.key));
        let to = graph.port_node(&edge.key.dest).and_then(|n| index.get(&n.key));
        if let (Some(from), Some(to)) = (from, to) {
            ranker.add_edge(*from, *to);
        }
    }
    ranker.rank()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: u32, name: &str, inputs: usize, outputs: usize) -> RankNode<u32> {
        RankNode {
            key,
            name: name.to_string(),
            inputs,
            outputs,
            port_kind: PortKind::Audio,
        }
    }

    fn ranks(ranked: &[Ranked<u32>]) -> BTreeMap<u32, usize> {
        ranked.iter().map(|r| (r.key, r.rank)).collect()
    }

    #[test]
    fn test_chain_ranks_follow_edges() {
        let mut ranker = TopologicalRanker::new();
        let src = ranker.add_node(node(1, "capture", 0, 2));
        let fx = ranker.add_node(node(2, "reverb", 2, 2));
        let mix = ranker.add_node(node(3, "mixer", 2, 2));
        let out = ranker.add_node(node(4, "playback", 2, 0));
        ranker.add_edge(src, fx);
        ranker.add_edge(fx, mix);
        ranker.add_edge(mix, out);
        // Skip-connection does not pull the sink forward
        ranker.add_edge(src, out);

        let ranked = ranker.rank();
        assert_eq!(ranks(&ranked), BTreeMap::from([(1, 0), (2, 1), (3, 2), (4, 3)]));
        let order: Vec<u32> = ranked.iter().map(|r| r.key).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_cycles_terminate_with_total_ranking() {
        for n in 1..8u32 {
            let mut ranker = TopologicalRanker::new();
            let ids: Vec<usize> = (0..n)
                .map(|k| ranker.add_node(node(k, &format!("n{}", k), 1, 1)))
                .collect();
            for k in 0..ids.len() {
                ranker.add_edge(ids[k], ids[(k + 1) % ids.len()]);
            }
            let ranked = ranker.rank();
            assert_eq!(ranked.len(), n as usize);
            assert!(ranked.iter().all(|r| r.rank <= n as usize));
        }
    }

    #[test]
    fn test_sinks_take_the_last_column() {
        let mut ranker = TopologicalRanker::new();
        let a = ranker.add_node(node(1, "a", 0, 1));
        let b = ranker.add_node(node(2, "b", 1, 1));
        let c = ranker.add_node(node(3, "c", 1, 1));
        let d = ranker.add_node(node(4, "d", 1, 1));
        let early_sink = ranker.add_node(node(5, "meter", 1, 0));
        let _idle_sink = ranker.add_node(node(6, "unplugged", 1, 0));
        ranker.add_edge(a, b);
        ranker.add_edge(b, c);
        ranker.add_edge(c, d);
        ranker.add_edge(d, b);
        ranker.add_edge(a, early_sink);

        let ranked = ranks(&ranker.rank());
        let max = *ranked.values().max().unwrap();
        assert_eq!(ranked[&5], max);
        assert_eq!(ranked[&6], max);
        assert!(ranked.iter().filter(|(k, _)| **k < 5).all(|(_, r)| *r < max));
    }

    #[test]
    fn test_unreachable_cycle_breaks_at_first_key() {
        let mut ranker = TopologicalRanker::new();
        let x = ranker.add_node(node(20, "x", 1, 1));
        let y = ranker.add_node(node(10, "y", 1, 1));
        ranker.add_edge(x, y);
        ranker.add_edge(y, x);
        ranker.add_edge(y, y);

        let ranked = ranks(&ranker.rank());
        // Traversal starts at key 10
        assert_eq!(ranked[&10], 1);
        assert_eq!(ranked[&20], 2);
    }

    #[test]
    fn test_ties_break_by_kind_count_name() {
        let mut ranker = TopologicalRanker::new();
        ranker.add_node(RankNode {
            port_kind: PortKind::Midi,
            ..node(1, "a", 0, 1)
        });
        ranker.add_node(node(2, "z", 0, 4));
        ranker.add_node(node(3, "b", 0, 1));
        ranker.add_node(node(4, "a", 0, 1));

        let order: Vec<u32> = ranker.rank().iter().map(|r| r.key).collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_long_chain_ranks_without_recursion() {
        const LEN: usize = 50_000;
        let mut ranker = TopologicalRanker::new();
        let ids: Vec<usize> = (0..LEN as u32)
            .map(|k| {
                let inputs = if k == 0 { 0 } else { 1 };
                ranker.add_node(node(k, &format!("n{}", k), inputs, 1))
            })
            .collect();
        for pair in ids.windows(2) {
            ranker.add_edge(pair[0], pair[1]);
        }

        let ranked = ranker.rank();
        assert_eq!(ranked.len(), LEN);
        assert!(ranked.iter().enumerate().all(|(i, r)| r.key == i as u32 && r.rank == i));
    }

    #[test]
    fn test_stacked_diamonds_rank_in_linear_passes() {
        // 200 diamonds in a row; each layer doubles the path count
        let mut ranker = TopologicalRanker::new();
        let mut key = 0u32;
        let mut add = |ranker: &mut TopologicalRanker<u32>, inputs| {
            key += 1;
            ranker.add_node(node(key, &format!("n{}", key), inputs, 1))
        };
        let mut top = add(&mut ranker, 0);
        for _ in 0..200 {
            let left = add(&mut ranker, 1);
            let right = add(&mut ranker, 1);
            let bottom = add(&mut ranker, 2);
            ranker.add_edge(top, left);
            ranker.add_edge(top, right);
            ranker.add_edge(left, bottom);
            ranker.add_edge(right, bottom);
            ranker.add_edge(top, bottom);
            top = bottom;
        }

        let ranked = ranks(&ranker.rank());
        assert_eq!(ranked.len(), 601);
        assert_eq!(ranked[&1], 0);
        assert_eq!(ranked[&601], 400);
    }
}
