//! Component-level projection of the dependency graph.
//!
//! Cycle detection uses petgraph's Tarjan SCC; ordering uses a Kahn sort that
//! prefers a caller-supplied order among ready nodes, so workflows keep the
//! sequence the user declared wherever dependencies allow.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::error::{GraphError, GraphResult};

#[derive(Debug, Clone, Default)]
pub struct ComponentGraph {
    graph: StableDiGraph<String, ()>,
    index: BTreeMap<String, NodeIndex>,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<'a>(nodes: impl IntoIterator<Item = &'a str>, edges: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut g = Self::new();
        for n in nodes {
            g.add_node(n);
        }
        for (a, b) in edges {
            g.add_edge(a, b);
        }
        g
    }

    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(ix) = self.index.get(name) {
            return *ix;
        }
        let ix = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), ix);
        ix
    }

    pub fn add_edge(&mut self, src: &str, dst: &str) {
        let a = self.add_node(src);
        let b = self.add_node(dst);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn remove_node(&mut self, name: &str) -> bool {
        match self.index.remove(name) {
            Some(ix) => {
                self.graph.remove_node(ix);
                true
            }
            None => false,
        }
    }

    pub fn remove_edge(&mut self, src: &str, dst: &str) -> bool {
        let (Some(a), Some(b)) = (self.index.get(src), self.index.get(dst)) else {
            return false;
        };
        match self.graph.find_edge(*a, *b) {
            Some(e) => {
                self.graph.remove_edge(e);
                true
            }
            None => false,
        }
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn contains_edge(&self, src: &str, dst: &str) -> bool {
        match (self.index.get(src), self.index.get(dst)) {
            (Some(a), Some(b)) => self.graph.find_edge(*a, *b).is_some(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Node names, sorted.
    pub fn nodes(&self) -> Vec<String> {
        self.index.keys().cloned().collect()
    }

    /// Edges as sorted name pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect();
        out.sort();
        out
    }

    fn neighbors(&self, name: &str, dir: Direction) -> Vec<String> {
        let Some(ix) = self.index.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .graph
            .neighbors_directed(*ix, dir)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    pub fn successors(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    pub fn predecessors(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    fn reach(&self, start: &str, dir: Direction) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        if self.contains_node(start) {
            seen.insert(start.to_string());
            queue.push_back(start.to_string());
        }
        while let Some(cur) = queue.pop_front() {
            for n in self.neighbors(&cur, dir) {
                if seen.insert(n.clone()) {
                    queue.push_back(n);
                }
            }
        }
        seen
    }

    /// `name` and everything reachable from it.
    pub fn descendants(&self, name: &str) -> BTreeSet<String> {
        self.reach(name, Direction::Outgoing)
    }

    /// `name` and everything that reaches it.
    pub fn ancestors(&self, name: &str) -> BTreeSet<String> {
        self.reach(name, Direction::Incoming)
    }

    /// Nodes on any path from `start` to `end`, both ends included; empty when
    /// no path exists.
    pub fn find_all_connecting(&self, start: &str, end: &str) -> BTreeSet<String> {
        let fwd = self.descendants(start);
        if !fwd.contains(end) {
            return BTreeSet::new();
        }
        let bwd = self.ancestors(end);
        fwd.intersection(&bwd).cloned().collect()
    }

    /// Strongly connected components, each sorted, singletons included.
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .map(|scc| {
                let mut names: Vec<String> = scc.into_iter().map(|ix| self.graph[ix].clone()).collect();
                names.sort();
                names
            })
            .collect();
        out.sort();
        out
    }

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Subgraph induced by `names`.
    pub fn subgraph(&self, names: &BTreeSet<String>) -> ComponentGraph {
        let mut sub = ComponentGraph::new();
        for n in names.iter().filter(|n| self.contains_node(n)) {
            sub.add_node(n);
        }
        for (a, b) in self.edges() {
            if names.contains(&a) && names.contains(&b) {
                sub.add_edge(&a, &b);
            }
        }
        sub
    }

    /// Groups of nodes connected when edge direction is ignored.
    pub fn weakly_connected_components(&self) -> Vec<BTreeSet<String>> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut groups = Vec::new();
        for start in self.nodes() {
            if seen.contains(&start) {
                continue;
            }
            let mut group = BTreeSet::new();
            let mut stack = vec![start];
            while let Some(cur) = stack.pop() {
                if !group.insert(cur.clone()) {
                    continue;
                }
                stack.extend(self.successors(&cur));
                stack.extend(self.predecessors(&cur));
            }
            seen.extend(group.iter().cloned());
            groups.push(group);
        }
        groups
    }

    /// Kahn topological sort. Among ready nodes the one earliest in
    /// `preferred` goes first; nodes absent from `preferred` follow by name.
    pub fn topological_sort(&self, preferred: &[String]) -> GraphResult<Vec<String>> {
        let rank = |name: &str| -> (usize, String) {
            let pos = preferred.iter().position(|p| p == name).unwrap_or(usize::MAX);
            (pos, name.to_string())
        };
        let mut indegree: BTreeMap<String, usize> = self
            .nodes()
            .into_iter()
            .map(|n| {
                let d = self.predecessors(&n).len();
                (n, d)
            })
            .collect();
        let mut ready: BTreeSet<(usize, String)> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| rank(n))
            .collect();
        let mut order = Vec::with_capacity(indegree.len());
        while let Some(next) = ready.pop_first() {
            let name = next.1;
            for succ in self.successors(&name) {
                if let Some(d) = indegree.get_mut(&succ) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(rank(&succ));
                    }
                }
            }
            order.push(name);
        }
        if order.len() != indegree.len() {
            let stuck: Vec<String> = indegree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(n, _)| n)
                .collect();
            return Err(GraphError::Invariant {
                what: format!("component graph still has a cycle through {stuck:?}"),
            });
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ComponentGraph {
        ComponentGraph::from_edges(["A", "B", "C", "D"], [("A", "B"), ("B", "C"), ("D", "C")])
    }

    #[test]
    fn find_all_connecting_spans_path() {
        let g = chain();
        let got: Vec<_> = g.find_all_connecting("A", "C").into_iter().collect();
        assert_eq!(got, vec!["A", "B", "C"]);
        assert!(g.find_all_connecting("C", "A").is_empty());
    }

    #[test]
    fn preferred_order_respected_where_free() {
        let g = chain();
        let order = g
            .topological_sort(&["D".into(), "C".into(), "B".into(), "A".into()])
            .unwrap();
        assert_eq!(order, vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn scc_and_cycle() {
        let mut g = chain();
        g.add_edge("C", "A");
        assert!(!g.is_acyclic());
        let sccs = g.strongly_connected_components();
        assert!(sccs.contains(&vec!["A".to_string(), "B".into(), "C".into()]));
        assert!(g.topological_sort(&[]).is_err());
        assert!(g.remove_edge("C", "A"));
        assert!(g.is_acyclic());
    }

    #[test]
    fn weak_components() {
        let g = ComponentGraph::from_edges(["A", "B", "C"], [("A", "B")]);
        assert_eq!(g.weakly_connected_components().len(), 2);
    }

    #[test]
    fn remove_node_keeps_other_indices_valid() {
        let mut g = chain();
        assert!(g.remove_node("B"));
        assert!(g.contains_edge("D", "C"));
        assert_eq!(g.len(), 3);
    }
}
