//! Graph reduction: collapse connection chains, prune to what a request
//! needs, and attach boundary stubs.
//!
//! The result is a [`ReducedGraph`] whose variable nodes are
//! [`CollapsedVar`]s: one producer plus every destination fed from it
//! through plain connections. Each collapsed node becomes one storage slot
//! downstream.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use mf_core::{Io, NodeId, VarMeta};
use tracing::debug;

use crate::component_graph::ComponentGraph;
use crate::error::{GraphError, GraphResult};
use crate::graph::{EdgeKind, NodeKind, VariableGraph};
use crate::path::overlaps;

/// A connection source together with all destinations it feeds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollapsedVar {
    pub src: String,
    /// Sorted; empty for a variable that carries no connection.
    pub dests: Vec<String>,
}

impl CollapsedVar {
    fn simple(name: &str) -> Self {
        Self {
            src: name.to_string(),
            dests: Vec::new(),
        }
    }

    pub fn is_connection(&self) -> bool {
        !self.dests.is_empty()
    }

    /// Source followed by destinations.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.src.as_str()).chain(self.dests.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RNode {
    Comp(String),
    Var(CollapsedVar),
}

/// What a component node of the reduced graph stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompRole {
    Component,
    Pseudo,
    Driver,
    /// Stub that publishes a boundary input's value.
    InVar,
    /// Stub that receives a boundary output's value.
    OutVar,
    /// Stub that owns a driver parameter's storage.
    Param,
}

/// Static facts about a variable name appearing in a collapsed node.
#[derive(Debug, Clone, PartialEq)]
pub struct NameInfo {
    pub base: String,
    /// Owning component, `None` for boundary variables.
    pub owner: Option<String>,
    pub io: Io,
    pub boundary: bool,
    /// Flattened positions inside the base; `None` for the whole base.
    pub indices: Option<Vec<usize>>,
    /// Attribute sub-variable (`B.a.x.y`) without numeric layout.
    pub attribute: bool,
}

impl NameInfo {
    /// Variable name local to its owner (`A.c[2]` -> `c`).
    pub fn local_base(&self) -> &str {
        match &self.owner {
            Some(o) => self
                .base
                .strip_prefix(o.as_str())
                .and_then(|r| r.strip_prefix('.'))
                .unwrap_or(&self.base),
            None => &self.base,
        }
    }
}

/// Names that must be present after reduction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReduceRequest {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub keep: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedGraph {
    comps: BTreeMap<String, CompRole>,
    vars: BTreeSet<CollapsedVar>,
    succ: BTreeMap<RNode, BTreeSet<RNode>>,
    pred: BTreeMap<RNode, BTreeSet<RNode>>,
    name2collapsed: BTreeMap<String, CollapsedVar>,
    names: BTreeMap<String, NameInfo>,
    metas: BTreeMap<String, VarMeta>,
}

impl ReducedGraph {
    /// Reduce a variable graph for `req`.
    ///
    /// Names in the request must resolve; missing sub-variables are created
    /// on a private copy of the graph.
    pub fn from_graph(graph: &VariableGraph, req: &ReduceRequest) -> GraphResult<ReducedGraph> {
        let mut g = graph.clone();
        for name in req.inputs.iter().chain(&req.outputs).chain(&req.keep) {
            if !g.contains(name) {
                g.ensure_subvar(name)?;
            }
        }
        let full = Self::collapse(&g)?;
        full.check_overlaps()?;
        let reduced = full.restrict(req, true)?;
        debug!(
            comps = reduced.comps.len(),
            vars = reduced.vars.len(),
            "reduced graph"
        );
        Ok(reduced)
    }

    /// Reduce an already-reduced graph again. Names the earlier reduction
    /// dropped are ignored.
    pub fn reduce(&self, req: &ReduceRequest) -> GraphResult<ReducedGraph> {
        self.restrict(req, false)
    }

    fn collapse(g: &VariableGraph) -> GraphResult<ReducedGraph> {
        let mut rg = ReducedGraph::default();
        let conn_succ = |id: NodeId| {
            g.successors(id)
                .filter(|(_, k)| *k == EdgeKind::Connection)
                .map(|(n, _)| n)
                .collect::<Vec<_>>()
        };

        for node in g.nodes().filter(|n| n.is_var()) {
            let is_root = !g.predecessors(node.id).any(|(_, k)| k == EdgeKind::Connection);
            let first = conn_succ(node.id);
            if !is_root || first.is_empty() {
                continue;
            }
            let mut dests = BTreeSet::new();
            let mut queue: VecDeque<_> = first.into();
            while let Some(d) = queue.pop_front() {
                if let Some(n) = g.node(d)
                    && dests.insert(n.name.clone())
                {
                    queue.extend(conn_succ(d));
                }
            }
            let cv = CollapsedVar {
                src: node.name.clone(),
                dests: dests.into_iter().collect(),
            };
            for name in cv.names() {
                if let Some(prev) = rg.name2collapsed.insert(name.to_string(), cv.clone()) {
                    return Err(GraphError::conflict(format!(
                        "'{name}' is fed by both '{}' and '{}'",
                        prev.src, cv.src
                    )));
                }
            }
            rg.vars.insert(cv);
        }

        for node in g.nodes() {
            match &node.kind {
                NodeKind::Component { pseudo } => {
                    let role = if *pseudo { CompRole::Pseudo } else { CompRole::Component };
                    rg.comps.insert(node.name.clone(), role);
                }
                NodeKind::Driver => {
                    rg.comps.insert(node.name.clone(), CompRole::Driver);
                }
                NodeKind::Variable { .. } | NodeKind::SubVariable { .. } => {
                    if !rg.name2collapsed.contains_key(&node.name) {
                        let cv = CollapsedVar::simple(&node.name);
                        rg.name2collapsed.insert(node.name.clone(), cv.clone());
                        rg.vars.insert(cv);
                    }
                    rg.names.insert(node.name.clone(), Self::compute_name_info(g, &node.name)?);
                    let base = g.base_var(&node.name);
                    if let Some(meta) = g.var_meta(&base) {
                        rg.metas.insert(base, meta.clone());
                    }
                }
            }
        }

        let map = |id: NodeId| -> Option<RNode> {
            let n = g.node(id)?;
            if n.is_var() {
                rg.name2collapsed.get(&n.name).cloned().map(RNode::Var)
            } else {
                Some(RNode::Comp(n.name.clone()))
            }
        };
        let mut edges = Vec::new();
        for node in g.nodes() {
            for (dst, kind) in g.successors(node.id) {
                if kind == EdgeKind::Connection {
                    continue;
                }
                if let (Some(a), Some(b)) = (map(node.id), map(dst))
                    && a != b
                {
                    edges.push((a, b));
                }
            }
            // Sub-variables of component variables talk to the component directly.
            if let NodeKind::SubVariable {
                io,
                boundary: false,
                ..
            } = node.kind
                && let (Some(owner), Some(sv)) = (node.owner, map(node.id))
                && let Some(comp) = map(owner)
            {
                if io == Io::In {
                    edges.push((sv, comp));
                } else {
                    edges.push((comp, sv));
                }
            }
        }
        for (a, b) in edges {
            rg.add_edge(a, b);
        }
        Ok(rg)
    }

    fn compute_name_info(g: &VariableGraph, name: &str) -> GraphResult<NameInfo> {
        let node = g.node_by_name(name).ok_or_else(|| GraphError::UnresolvedPath {
            path: name.to_string(),
        })?;
        let (io, boundary) = node.var_io().ok_or_else(|| GraphError::Invariant {
            what: format!("'{name}' is not a variable"),
        })?;
        let (indices, attribute) = match g.path_indices(name) {
            Ok(idx) => (idx, false),
            Err(GraphError::BadIndex { .. }) if node.is_subvar() => (None, true),
            Err(e) => return Err(e),
        };
        Ok(NameInfo {
            base: g.base_var(name),
            owner: node.owner.and_then(|o| g.node(o)).map(|o| o.name.clone()),
            io,
            boundary,
            indices,
            attribute,
        })
    }

    /// Index sub-variables of one base touched by different collapsed nodes,
    /// whether read as sources or written as destinations, must select
    /// disjoint positions.
    fn check_overlaps(&self) -> GraphResult<()> {
        let mut groups: BTreeMap<&str, Vec<(usize, &str, &[usize])>> = BTreeMap::new();
        for (k, cv) in self.vars.iter().filter(|cv| cv.is_connection()).enumerate() {
            for name in cv.names() {
                if let Some(info) = self.names.get(name)
                    && let Some(idx) = &info.indices
                {
                    groups
                        .entry(info.base.as_str())
                        .or_default()
                        .push((k, name, idx.as_slice()));
                }
            }
        }
        for members in groups.values() {
            for (i, (ka, a, ia)) in members.iter().enumerate() {
                for (kb, b, ib) in &members[i + 1..] {
                    if ka != kb && overlaps(ia, ib) {
                        return Err(GraphError::conflict(format!(
                            "Subvars ['{a}', '{b}'] share overlapping indices. Try reformulating the problem to prevent this."
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<RNode> {
        match self.comps.get(name) {
            Some(CompRole::InVar | CompRole::OutVar) | None => {
                self.name2collapsed.get(name).cloned().map(RNode::Var)
            }
            Some(_) => Some(RNode::Comp(name.to_string())),
        }
    }

    fn resolve_all(&self, names: &[String], strict: bool) -> GraphResult<BTreeSet<RNode>> {
        let mut out = BTreeSet::new();
        for n in names {
            match self.resolve(n) {
                Some(r) => {
                    out.insert(r);
                }
                None if strict => {
                    return Err(GraphError::UnresolvedPath { path: n.clone() });
                }
                None => {}
            }
        }
        Ok(out)
    }

    fn all_nodes(&self) -> BTreeSet<RNode> {
        self.comps
            .keys()
            .cloned()
            .map(RNode::Comp)
            .chain(self.vars.iter().cloned().map(RNode::Var))
            .collect()
    }

    fn reach(&self, start: &BTreeSet<RNode>, forward: bool) -> BTreeSet<RNode> {
        let adj = if forward { &self.succ } else { &self.pred };
        let mut seen = start.clone();
        let mut queue: VecDeque<RNode> = start.iter().cloned().collect();
        while let Some(cur) = queue.pop_front() {
            for n in adj.get(&cur).into_iter().flatten() {
                if seen.insert(n.clone()) {
                    queue.push_back(n.clone());
                }
            }
        }
        seen
    }

    /// Relevance pruning plus boundary stubs.
    fn restrict(&self, req: &ReduceRequest, strict: bool) -> GraphResult<ReducedGraph> {
        let inputs = self.resolve_all(&req.inputs, strict)?;
        let outputs = self.resolve_all(&req.outputs, strict)?;
        let keep_names: Vec<String> = req.keep.iter().cloned().collect();
        let keep = self.resolve_all(&keep_names, strict)?;

        let fwd = if inputs.is_empty() {
            self.all_nodes()
        } else {
            self.reach(&inputs, true)
        };
        let bwd = if outputs.is_empty() {
            self.all_nodes()
        } else {
            self.reach(&outputs, false)
        };
        let relevant: BTreeSet<RNode> = fwd
            .intersection(&bwd)
            .cloned()
            .chain(keep.iter().cloned())
            .collect();

        // Variables that carry no connection only survive when kept.
        let mut survivors: BTreeSet<RNode> = relevant
            .iter()
            .filter(|n| match n {
                RNode::Comp(c) => !matches!(
                    self.comps.get(c),
                    Some(CompRole::InVar | CompRole::OutVar)
                ),
                RNode::Var(cv) => cv.is_connection() || keep.contains(*n),
            })
            .cloned()
            .collect();
        // Boundary bases stay when one of their sub-variables survives.
        let boundary_bases: Vec<RNode> = relevant
            .iter()
            .filter(|n| match n {
                RNode::Var(cv) => {
                    !survivors.contains(*n)
                        && self.names.get(&cv.src).is_some_and(|i| i.boundary && i.base == cv.src)
                }
                RNode::Comp(_) => false,
            })
            .filter(|n| {
                self.succ
                    .get(*n)
                    .into_iter()
                    .flatten()
                    .chain(self.pred.get(*n).into_iter().flatten())
                    .any(|m| matches!(m, RNode::Var(_)) && survivors.contains(m))
            })
            .cloned()
            .collect();
        survivors.extend(boundary_bases);

        let mut out = ReducedGraph::default();
        for n in &survivors {
            match n {
                RNode::Comp(c) => {
                    if let Some(role) = self.comps.get(c) {
                        out.comps.insert(c.clone(), *role);
                    }
                }
                RNode::Var(cv) => {
                    out.vars.insert(cv.clone());
                    for name in cv.names() {
                        out.name2collapsed.insert(name.to_string(), cv.clone());
                        if let Some(info) = self.names.get(name) {
                            if let Some(meta) = self.metas.get(&info.base) {
                                out.metas.insert(info.base.clone(), meta.clone());
                            }
                            out.names.insert(name.to_string(), info.clone());
                        }
                    }
                }
            }
        }
        for (a, succs) in &self.succ {
            if !survivors.contains(a) {
                continue;
            }
            for b in succs.iter().filter(|b| survivors.contains(*b)) {
                out.add_edge(a.clone(), b.clone());
            }
        }
        out.attach_boundary_stubs();
        Ok(out)
    }

    fn attach_boundary_stubs(&mut self) {
        let vars: Vec<CollapsedVar> = self.vars.iter().cloned().collect();
        for cv in vars {
            let node = RNode::Var(cv.clone());
            if let Some(info) = self.names.get(&cv.src).cloned()
                && info.boundary
                && info.io == Io::In
            {
                let has_comp_pred = self
                    .pred
                    .get(&node)
                    .is_some_and(|p| p.iter().any(|n| matches!(n, RNode::Comp(_))));
                if !has_comp_pred {
                    self.comps.insert(info.base.clone(), CompRole::InVar);
                    self.add_edge(RNode::Comp(info.base), node.clone());
                }
            }
            for d in &cv.dests {
                if let Some(info) = self.names.get(d).cloned()
                    && info.boundary
                    && info.io == Io::Out
                {
                    self.comps.insert(info.base.clone(), CompRole::OutVar);
                    self.add_edge(node.clone(), RNode::Comp(info.base));
                }
            }
        }
    }

    fn add_edge(&mut self, a: RNode, b: RNode) {
        self.succ.entry(a.clone()).or_default().insert(b.clone());
        self.pred.entry(b).or_default().insert(a);
    }

    // ---- queries -----------------------------------------------------------

    pub fn comps(&self) -> impl Iterator<Item = (&str, CompRole)> {
        self.comps.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn role(&self, comp: &str) -> Option<CompRole> {
        self.comps.get(comp).copied()
    }

    pub fn vars(&self) -> impl Iterator<Item = &CollapsedVar> {
        self.vars.iter()
    }

    pub fn successors(&self, node: &RNode) -> impl Iterator<Item = &RNode> {
        self.succ.get(node).into_iter().flatten()
    }

    pub fn predecessors(&self, node: &RNode) -> impl Iterator<Item = &RNode> {
        self.pred.get(node).into_iter().flatten()
    }

    /// Collapsed node holding `name` (a source or destination).
    pub fn collapsed(&self, name: &str) -> Option<&CollapsedVar> {
        self.name2collapsed.get(name)
    }

    pub fn name2collapsed(&self) -> &BTreeMap<String, CollapsedVar> {
        &self.name2collapsed
    }

    pub fn name_info(&self, name: &str) -> Option<&NameInfo> {
        self.names.get(name)
    }

    /// Declared metadata of a base variable.
    pub fn meta(&self, base: &str) -> Option<&VarMeta> {
        self.metas.get(base)
    }

    /// All edges, sorted.
    pub fn edges(&self) -> Vec<(RNode, RNode)> {
        self.succ
            .iter()
            .flat_map(|(a, bs)| bs.iter().map(move |b| (a.clone(), b.clone())))
            .collect()
    }

    /// Projection onto component nodes: `A -> B` when `A` reaches `B`
    /// through variable nodes only.
    pub fn component_graph(&self) -> ComponentGraph {
        let mut cg = ComponentGraph::new();
        for name in self.comps.keys() {
            cg.add_node(name);
            let start = RNode::Comp(name.clone());
            let mut seen = BTreeSet::new();
            let mut stack: Vec<&RNode> = self.successors(&start).collect();
            while let Some(cur) = stack.pop() {
                match cur {
                    RNode::Comp(other) => {
                        if other != name {
                            cg.add_edge(name, other);
                        }
                    }
                    RNode::Var(_) => {
                        if seen.insert(cur) {
                            stack.extend(self.successors(cur));
                        }
                    }
                }
            }
        }
        cg
    }
}

/// Reduce `graph` for `req`.
pub fn reduce_graph(graph: &VariableGraph, req: &ReduceRequest) -> GraphResult<ReducedGraph> {
    ReducedGraph::from_graph(graph, req)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv(src: &str, dests: &[&str]) -> RNode {
        RNode::Var(CollapsedVar {
            src: src.into(),
            dests: dests.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn comp(name: &str) -> RNode {
        RNode::Comp(name.into())
    }

    fn chain3() -> VariableGraph {
        let mut g = VariableGraph::new();
        for c in ["C1", "C2", "C3"] {
            g.add_component(c, &[VarMeta::input("in"), VarMeta::output("out")], false)
                .unwrap();
        }
        g
    }

    #[test]
    fn input_redirect_collapses_into_one_node() {
        let mut g = chain3();
        g.connect("C1.out", "C2.in").unwrap();
        g.connect("C2.in", "C3.in").unwrap();
        let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
        let node = cv("C1.out", &["C2.in", "C3.in"]);
        let edges = rg.edges();
        assert!(edges.contains(&(comp("C1"), node.clone())));
        assert!(edges.contains(&(node.clone(), comp("C2"))));
        assert!(edges.contains(&(node, comp("C3"))));
        // Unconnected variables are pruned.
        assert!(rg.collapsed("C1.in").is_none());
        assert!(rg.collapsed("C3.out").is_none());
        assert_eq!(
            rg.collapsed("C3.in").map(|c| c.src.as_str()),
            Some("C1.out")
        );
    }

    #[test]
    fn relevance_drops_unrelated_components() {
        let mut g = chain3();
        g.add_component("X", &[VarMeta::input("in"), VarMeta::output("out")], false)
            .unwrap();
        g.connect("C1.out", "C2.in").unwrap();
        g.connect("C2.out", "C3.in").unwrap();
        g.connect("C3.out", "X.in").unwrap();
        let req = ReduceRequest {
            inputs: vec!["C1.in".into()],
            outputs: vec!["C3.out".into()],
            keep: BTreeSet::new(),
        };
        let rg = reduce_graph(&g, &req).unwrap();
        let names: Vec<&str> = rg.comps().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["C1", "C2", "C3"]);
    }

    #[test]
    fn kept_variables_survive() {
        let g = chain3();
        let req = ReduceRequest {
            keep: ["C2.out".to_string()].into(),
            ..Default::default()
        };
        let rg = reduce_graph(&g, &req).unwrap();
        assert!(rg.collapsed("C2.out").is_some());
        assert!(rg.edges().contains(&(comp("C2"), cv("C2.out", &[]))));
    }

    #[test]
    fn boundary_stubs() {
        let mut g = chain3();
        g.add_boundary_var(VarMeta::input("a")).unwrap();
        g.add_boundary_var(VarMeta::output("z")).unwrap();
        g.connect("a", "C1.in").unwrap();
        g.connect("C1.out", "z").unwrap();
        let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
        assert_eq!(rg.role("a"), Some(CompRole::InVar));
        assert_eq!(rg.role("z"), Some(CompRole::OutVar));
        assert!(rg.edges().contains(&(comp("a"), cv("a", &["C1.in"]))));
        assert!(rg.edges().contains(&(cv("C1.out", &["z"]), comp("z"))));
    }

    #[test]
    fn subvars_rewire_to_components() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("out").with_shape([4])], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("in").with_shape([4])], false)
            .unwrap();
        g.connect("A.out[1]", "B.in[2]").unwrap();
        let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
        let node = cv("A.out[1]", &["B.in[2]"]);
        assert!(rg.edges().contains(&(comp("A"), node.clone())));
        assert!(rg.edges().contains(&(node, comp("B"))));
        assert_eq!(rg.component_graph().edges(), vec![("A".into(), "B".into())]);
        let info = rg.name_info("B.in[2]").unwrap();
        assert_eq!(info.indices, Some(vec![2]));
        assert_eq!(info.local_base(), "in");
    }

    #[test]
    fn overlapping_source_ranges_conflict() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("out").with_shape([8])], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("in").with_shape([5])], false)
            .unwrap();
        g.add_component("C", &[VarMeta::input("in").with_shape([5])], false)
            .unwrap();
        g.connect("A.out[:5]", "B.in").unwrap();
        g.connect("A.out[3:]", "C.in").unwrap();
        let err = reduce_graph(&g, &ReduceRequest::default()).unwrap_err();
        assert!(matches!(err, GraphError::Conflict { .. }));
        assert!(err.to_string().contains("share overlapping indices"));
    }

    #[test]
    fn disjoint_ranges_accepted() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("out").with_shape([8])], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("in").with_shape([8])], false)
            .unwrap();
        g.connect("A.out[:4]", "B.in[4:]").unwrap();
        g.connect("A.out[4:]", "B.in[:4]").unwrap();
        assert!(reduce_graph(&g, &ReduceRequest::default()).is_ok());
    }

    #[test]
    fn overlapping_write_and_read_conflict() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("y").with_shape([2])], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("u").with_shape([2])], false)
            .unwrap();
        g.add_boundary_var(VarMeta::output("c").with_shape([3])).unwrap();
        g.connect("A.y", "c[:2]").unwrap();
        g.connect("c[1:]", "B.u").unwrap();
        let err = reduce_graph(&g, &ReduceRequest::default()).unwrap_err();
        assert!(matches!(err, GraphError::Conflict { .. }));
        assert!(err.to_string().contains("c[:2]"));
        assert!(err.to_string().contains("c[1:]"));
    }

    #[test]
    fn pass_through_slice_is_not_its_own_conflict() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("y")], false).unwrap();
        g.add_component("B", &[VarMeta::input("u")], false).unwrap();
        g.add_boundary_var(VarMeta::output("c").with_shape([3])).unwrap();
        g.connect("A.y", "c[1]").unwrap();
        g.connect("c[1]", "B.u").unwrap();
        assert!(reduce_graph(&g, &ReduceRequest::default()).is_ok());
    }

    #[test]
    fn reduction_is_idempotent() {
        let mut g = chain3();
        g.add_boundary_var(VarMeta::input("a")).unwrap();
        g.add_boundary_var(VarMeta::output("z")).unwrap();
        g.connect("a", "C1.in").unwrap();
        g.connect("C1.out", "C2.in").unwrap();
        g.connect("C2.in", "C3.in").unwrap();
        g.connect("C3.out", "z").unwrap();
        let req = ReduceRequest {
            inputs: vec!["a".into()],
            outputs: vec!["z".into()],
            keep: ["C2.out".to_string()].into(),
        };
        let once = reduce_graph(&g, &req).unwrap();
        let twice = once.reduce(&req).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_request_name_is_an_error() {
        let g = chain3();
        let req = ReduceRequest {
            outputs: vec!["C9.out".into()],
            ..Default::default()
        };
        assert!(matches!(
            reduce_graph(&g, &req),
            Err(GraphError::UnresolvedPath { .. })
        ));
    }
}
