//! Variable-level dependency graph.
//!
//! Nodes live in an arena addressed by [`NodeId`]; removed nodes leave an
//! empty slot so handles stay stable. Edges follow data flow:
//!
//! - component input: `A.a -> A`; component output, state or residual: `A -> A.c`
//! - boundary input `a` is a source, boundary output `c` is a sink
//! - sub-variables of input-side bases feed the base (`B.b[1] -> B.b`),
//!   sub-variables of output-side bases are fed by it (`A.c -> A.c[2]`)

use std::collections::{BTreeMap, BTreeSet};

use mf_core::{Id, Io, NodeId, VarMeta};
use mf_expr::expression::path_refers_to;
use tracing::debug;

use crate::component_graph::ComponentGraph;
use crate::error::{GraphError, GraphResult};
use crate::mapper::PSEUDO_PREFIX;
use crate::path::{flat_indices, parse_indices, split_index};

/// Edge tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Component to its variable, or base variable to sub-variable.
    Structural,
    /// Explicit user connection.
    Connection,
    /// Driver to parameter target, or response variable to driver.
    Driver,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Component { pseudo: bool },
    Driver,
    Variable { meta: VarMeta, boundary: bool },
    SubVariable { io: Io, boundary: bool, base: NodeId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Owning component for component variables and their sub-variables.
    pub owner: Option<NodeId>,
}

impl Node {
    pub fn is_component(&self) -> bool {
        matches!(self.kind, NodeKind::Component { .. })
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self.kind, NodeKind::Component { pseudo: true })
    }

    pub fn is_driver(&self) -> bool {
        matches!(self.kind, NodeKind::Driver)
    }

    pub fn is_var(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Variable { .. } | NodeKind::SubVariable { .. }
        )
    }

    pub fn is_subvar(&self) -> bool {
        matches!(self.kind, NodeKind::SubVariable { .. })
    }

    /// io-direction and boundary flag for variables.
    pub fn var_io(&self) -> Option<(Io, bool)> {
        match &self.kind {
            NodeKind::Variable { meta, boundary } => Some((meta.io, *boundary)),
            NodeKind::SubVariable { io, boundary, .. } => Some((*io, *boundary)),
            _ => None,
        }
    }
}

/// True when data flows from a sub-variable into its base.
fn feeds_base(io: Io, boundary: bool) -> bool {
    (io == Io::In) != boundary
}

#[derive(Debug, Clone, Default)]
pub struct VariableGraph {
    nodes: Vec<Option<Node>>,
    names: BTreeMap<String, NodeId>,
    succ: Vec<BTreeMap<NodeId, EdgeKind>>,
    pred: Vec<BTreeMap<NodeId, EdgeKind>>,
}

impl VariableGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- arena primitives ----------------------------------------------

    fn insert_node(&mut self, name: &str, kind: NodeKind, owner: Option<NodeId>) -> GraphResult<NodeId> {
        if self.names.contains_key(name) {
            return Err(GraphError::DuplicateName {
                name: name.to_string(),
            });
        }
        let id = Id::from_index(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            id,
            name: name.to_string(),
            kind,
            owner,
        }));
        self.succ.push(BTreeMap::new());
        self.pred.push(BTreeMap::new());
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn add_edge(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) {
        self.succ[src.slot()].insert(dst, kind);
        self.pred[dst.slot()].insert(src, kind);
    }

    fn remove_edge(&mut self, src: NodeId, dst: NodeId) -> Option<EdgeKind> {
        self.pred[dst.slot()].remove(&src);
        self.succ[src.slot()].remove(&dst)
    }

    fn remove_node(&mut self, id: NodeId) {
        let succs: Vec<NodeId> = self.succ[id.slot()].keys().copied().collect();
        let preds: Vec<NodeId> = self.pred[id.slot()].keys().copied().collect();
        for s in succs {
            self.remove_edge(id, s);
        }
        for p in preds {
            self.remove_edge(p, id);
        }
        if let Some(node) = self.nodes[id.slot()].take() {
            self.names.remove(&node.name);
        }
    }

    // ---- queries -----------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.slot()).and_then(Option::as_ref)
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.id_of(name).and_then(|id| self.node(id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn is_component(&self, name: &str) -> bool {
        self.node_by_name(name).is_some_and(Node::is_component)
    }

    /// Live nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.succ[id.slot()].iter().map(|(k, v)| (*k, *v))
    }

    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.pred[id.slot()].iter().map(|(k, v)| (*k, *v))
    }

    /// All edges as `(src, dst, kind)` names, sorted.
    pub fn edges(&self) -> Vec<(String, String, EdgeKind)> {
        let mut out = Vec::new();
        for node in self.nodes() {
            for (dst, kind) in self.successors(node.id) {
                if let Some(d) = self.node(dst) {
                    out.push((node.name.clone(), d.name.clone(), kind));
                }
            }
        }
        out.sort();
        out
    }

    fn name(&self, id: NodeId) -> &str {
        self.node(id).map_or("", |n| n.name.as_str())
    }

    /// Declared metadata of the base variable behind `path`.
    pub fn var_meta(&self, path: &str) -> Option<&VarMeta> {
        let base = self.base_var(path);
        match &self.node_by_name(&base)?.kind {
            NodeKind::Variable { meta, .. } => Some(meta),
            _ => None,
        }
    }

    /// Name of the base variable for a path.
    ///
    /// `A.c[2]` -> `A.c`, `B.a.x.y` -> `B.a` when `B` is a component;
    /// `a.x[3].y` -> `a` for boundary variables.
    pub fn base_var(&self, path: &str) -> String {
        let (head, _) = split_index(path);
        let mut parts = head.splitn(3, '.');
        let first = parts.next().unwrap_or_default();
        let owner_like = self
            .node_by_name(first)
            .is_some_and(|n| n.is_component() || n.is_driver());
        match (owner_like, parts.next()) {
            (true, Some(second)) => format!("{first}.{second}"),
            _ => first.to_string(),
        }
    }

    /// Flattened positions of `path` inside its base, or `None` for the whole
    /// base. Attribute sub-variables report an error.
    pub fn path_indices(&self, path: &str) -> GraphResult<Option<Vec<usize>>> {
        let base = self.base_var(path);
        if base == path {
            return Ok(None);
        }
        let meta = self.var_meta(path).ok_or_else(|| GraphError::UnresolvedPath {
            path: path.to_string(),
        })?;
        let (head, _) = split_index(path);
        if head != base {
            return Err(GraphError::BadIndex {
                path: path.to_string(),
                what: "attribute sub-variables have no numeric layout".into(),
            });
        }
        let items = parse_indices(path)?;
        Ok(Some(flat_indices(path, &items, &meta.shape)?))
    }

    /// Number of flattened entries addressed by `path`.
    pub fn path_size(&self, path: &str) -> GraphResult<usize> {
        match self.path_indices(path)? {
            Some(idx) => Ok(idx.len()),
            None => self
                .var_meta(path)
                .map(VarMeta::size)
                .ok_or_else(|| GraphError::UnresolvedPath {
                    path: path.to_string(),
                }),
        }
    }

    // ---- construction --------------------------------------------------------

    fn check_plain_name(name: &str) -> GraphResult<()> {
        if name.is_empty() || name.contains(['.', '[', ']']) {
            return Err(GraphError::connection(format!(
                "'{name}' is not a valid simple name"
            )));
        }
        Ok(())
    }

    fn check_user_name(name: &str) -> GraphResult<()> {
        Self::check_plain_name(name)?;
        if name.starts_with(PSEUDO_PREFIX) {
            return Err(GraphError::connection(format!(
                "'{name}' uses the prefix '{PSEUDO_PREFIX}' reserved for pseudo-components"
            )));
        }
        Ok(())
    }

    /// Add a component and one node per declared variable.
    pub fn add_component(&mut self, name: &str, vars: &[VarMeta], pseudo: bool) -> GraphResult<NodeId> {
        if pseudo {
            Self::check_plain_name(name)?;
        } else {
            Self::check_user_name(name)?;
        }
        for v in vars {
            if self.contains(&format!("{name}.{}", v.name)) {
                return Err(GraphError::DuplicateName {
                    name: format!("{name}.{}", v.name),
                });
            }
        }
        let comp = self.insert_node(name, NodeKind::Component { pseudo }, None)?;
        for v in vars {
            let var = self.insert_node(
                &format!("{name}.{}", v.name),
                NodeKind::Variable {
                    meta: v.clone(),
                    boundary: false,
                },
                Some(comp),
            )?;
            if v.io == Io::In {
                self.add_edge(var, comp, EdgeKind::Structural);
            } else {
                self.add_edge(comp, var, EdgeKind::Structural);
            }
        }
        debug!(component = name, vars = vars.len(), pseudo, "added component");
        Ok(comp)
    }

    /// Add an assembly-level interface variable (`Io::In` or `Io::Out`).
    pub fn add_boundary_var(&mut self, meta: VarMeta) -> GraphResult<NodeId> {
        Self::check_user_name(&meta.name)?;
        if !matches!(meta.io, Io::In | Io::Out) {
            return Err(GraphError::connection(format!(
                "boundary variable '{}' must be an input or an output",
                meta.name
            )));
        }
        let name = meta.name.clone();
        self.insert_node(
            &name,
            NodeKind::Variable {
                meta,
                boundary: true,
            },
            None,
        )
    }

    /// Add a driver node with edges to its parameter targets and from the
    /// variables its constraints/objectives read.
    pub fn add_driver(&mut self, name: &str, params: &[String], responses: &[String]) -> GraphResult<NodeId> {
        Self::check_plain_name(name)?;
        for p in params.iter().chain(responses) {
            self.check_resolvable(p)?;
        }
        let drv = self.insert_node(name, NodeKind::Driver, None)?;
        for p in params {
            let target = self.ensure_subvar(p)?;
            self.add_edge(drv, target, EdgeKind::Driver);
        }
        for r in responses {
            let src = self.ensure_subvar(r)?;
            self.add_edge(src, drv, EdgeKind::Driver);
        }
        Ok(drv)
    }

    fn check_resolvable(&self, path: &str) -> GraphResult<()> {
        if self.contains(path) {
            return Ok(());
        }
        let base = self.base_var(path);
        match self.node_by_name(&base) {
            Some(n) if matches!(n.kind, NodeKind::Variable { .. }) => {
                let (head, _) = split_index(path);
                if head == base {
                    self.path_indices(path)?;
                }
                Ok(())
            }
            _ => Err(GraphError::UnresolvedPath {
                path: path.to_string(),
            }),
        }
    }

    /// Return the node for `path`, creating the sub-variable node if needed.
    pub fn ensure_subvar(&mut self, path: &str) -> GraphResult<NodeId> {
        if let Some(id) = self.id_of(path) {
            return Ok(id);
        }
        self.check_resolvable(path)?;
        let base_name = self.base_var(path);
        let base = self.id_of(&base_name).ok_or_else(|| GraphError::UnresolvedPath {
            path: path.to_string(),
        })?;
        let (io, boundary, owner) = match self.node(base) {
            Some(Node {
                kind: NodeKind::Variable { meta, boundary },
                owner,
                ..
            }) => (meta.io, *boundary, *owner),
            _ => {
                return Err(GraphError::UnresolvedPath {
                    path: path.to_string(),
                });
            }
        };
        let id = self.insert_node(path, NodeKind::SubVariable { io, boundary, base }, owner)?;
        if feeds_base(io, boundary) {
            self.add_edge(id, base, EdgeKind::Structural);
        } else {
            self.add_edge(base, id, EdgeKind::Structural);
        }
        debug!(subvar = path, base = base_name.as_str(), "added sub-variable");
        Ok(id)
    }

    /// Sub-variable nodes hanging off a base variable.
    pub fn subvars_of(&self, base: NodeId) -> Vec<NodeId> {
        self.successors(base)
            .chain(self.predecessors(base))
            .filter(|(id, _)| {
                matches!(self.node(*id), Some(Node { kind: NodeKind::SubVariable { base: b, .. }, .. }) if *b == base)
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn base_of(&self, id: NodeId) -> NodeId {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::SubVariable { base, .. }) => *base,
            _ => id,
        }
    }

    fn connection_source(&self, id: NodeId) -> Option<NodeId> {
        self.predecessors(id)
            .find(|(_, k)| *k == EdgeKind::Connection)
            .map(|(p, _)| p)
    }

    /// Validate a bare-variable connection without mutating the graph.
    pub fn check_connect(&self, src: &str, dest: &str) -> GraphResult<()> {
        for p in [src, dest] {
            self.check_resolvable(p)?;
            if self.node_by_name(p).is_some_and(|n| !n.is_var()) {
                return Err(GraphError::connection(format!("'{p}' is not a variable")));
            }
        }
        let dest_base = self.base_var(dest);
        if let Some(n) = self.node_by_name(&dest_base) {
            match n.var_io() {
                Some((Io::Out | Io::Residual, false)) => {
                    return Err(GraphError::connection(format!(
                        "'{dest}' is an output and can't be a connection destination"
                    )));
                }
                Some((Io::In, true)) => {
                    return Err(GraphError::connection(format!(
                        "'{dest}' is a boundary input and can't be a connection destination"
                    )));
                }
                _ => {}
            }
        }
        let src_owner = self.node_by_name(&self.base_var(src)).and_then(|n| n.owner);
        let dest_owner = self.node_by_name(&dest_base).and_then(|n| n.owner);
        if src_owner.is_some() && src_owner == dest_owner {
            return Err(GraphError::connection(format!(
                "'{src}' and '{dest}' refer to the same component."
            )));
        }
        self.check_dest_free(dest)
    }

    /// Fail if `dest`, its base, or any sub-variable of its base already has a
    /// connection that would overlap a new one into `dest`.
    pub fn check_dest_free(&self, dest: &str) -> GraphResult<()> {
        if let Some(id) = self.id_of(dest)
            && let Some(src) = self.connection_source(id)
        {
            return Err(GraphError::connection(format!(
                "'{dest}' is already connected to source '{}'",
                self.name(src)
            )));
        }
        let base_name = self.base_var(dest);
        let Some(base) = self.id_of(&base_name) else {
            return Ok(());
        };
        if base_name == dest {
            for sub in self.subvars_of(base) {
                if let Some(src) = self.connection_source(sub) {
                    return Err(GraphError::connection(format!(
                        "'{}' is already connected to '{}'",
                        self.name(sub),
                        self.name(src)
                    )));
                }
            }
        } else if let Some(src) = self.connection_source(base) {
            return Err(GraphError::connection(format!(
                "'{base_name}' is already connected to '{}'",
                self.name(src)
            )));
        }
        Ok(())
    }

    /// Connect two bare variable paths.
    pub fn connect(&mut self, src: &str, dest: &str) -> GraphResult<()> {
        self.check_connect(src, dest)?;
        let s = self.ensure_subvar(src)?;
        let d = self.ensure_subvar(dest)?;
        self.add_edge(s, d, EdgeKind::Connection);
        debug!(src, dest, "connected");
        Ok(())
    }

    fn endpoint_matches(&self, id: NodeId, path: &str) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if path_refers_to(&node.name, path) {
            return true;
        }
        node.owner
            .and_then(|o| self.node(o))
            .is_some_and(|o| o.name == path)
    }

    /// Remove connections touching `path`, or only those between `path` and
    /// `path2`. Returns the removed `(src, dest)` pairs.
    pub fn disconnect(&mut self, path: &str, path2: Option<&str>) -> GraphResult<Vec<(String, String)>> {
        let mut doomed = Vec::new();
        for node in self.nodes() {
            for (dst, kind) in self.successors(node.id) {
                if kind != EdgeKind::Connection {
                    continue;
                }
                let hit = match path2 {
                    Some(p2) => {
                        (self.endpoint_matches(node.id, path) && self.endpoint_matches(dst, p2))
                            || (self.endpoint_matches(node.id, p2)
                                && self.endpoint_matches(dst, path))
                    }
                    None => {
                        self.endpoint_matches(node.id, path) || self.endpoint_matches(dst, path)
                    }
                };
                if hit {
                    doomed.push((node.id, dst));
                }
            }
        }
        if doomed.is_empty() && path2.is_some() {
            return Err(GraphError::connection(format!(
                "'{path}' and '{}' are not connected",
                path2.unwrap_or_default()
            )));
        }
        let mut removed = Vec::new();
        for (s, d) in &doomed {
            removed.push((self.name(*s).to_string(), self.name(*d).to_string()));
            self.remove_edge(*s, *d);
        }
        let touched: BTreeSet<NodeId> = doomed.iter().flat_map(|(s, d)| [*s, *d]).collect();
        self.prune_orphan_subvars(touched);
        removed.sort();
        debug!(path, ?path2, removed = removed.len(), "disconnected");
        Ok(removed)
    }

    /// Drop sub-variables among `candidates` that no longer carry any
    /// connection or driver edge.
    fn prune_orphan_subvars(&mut self, candidates: impl IntoIterator<Item = NodeId>) {
        for id in candidates {
            let Some(node) = self.node(id) else { continue };
            if !node.is_subvar() {
                continue;
            }
            let used = self
                .successors(id)
                .chain(self.predecessors(id))
                .any(|(_, k)| k != EdgeKind::Structural);
            if !used {
                self.remove_node(id);
            }
        }
    }

    /// Remove a component (with its variables) or a boundary variable, along
    /// with every connection that touches it. Returns the removed connections.
    pub fn remove(&mut self, name: &str) -> GraphResult<Vec<(String, String)>> {
        let id = self.id_of(name).ok_or_else(|| GraphError::UnresolvedPath {
            path: name.to_string(),
        })?;
        let removed = self.disconnect(name, None)?;
        let mut doomed: Vec<NodeId> = self
            .nodes()
            .filter(|n| n.owner == Some(id) || (n.id != id && self.base_of(n.id) == id))
            .map(|n| n.id)
            .collect();
        doomed.push(id);
        let neighbours: BTreeSet<NodeId> = doomed
            .iter()
            .flat_map(|d| self.successors(*d).chain(self.predecessors(*d)).map(|(n, _)| n))
            .collect();
        for d in doomed {
            self.remove_node(d);
        }
        self.prune_orphan_subvars(neighbours);
        debug!(name, "removed");
        Ok(removed)
    }

    // ---- connection queries --------------------------------------------------

    /// All connections as sorted `(src, dest)` pairs.
    pub fn list_connections(&self) -> Vec<(String, String)> {
        self.edges()
            .into_iter()
            .filter(|(_, _, k)| *k == EdgeKind::Connection)
            .map(|(s, d, _)| (s, d))
            .collect()
    }

    /// Connections with an endpoint under `name` (a component, variable or sub-variable).
    pub fn connections_to(&self, name: &str) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for node in self.nodes() {
            for (dst, kind) in self.successors(node.id) {
                if kind == EdgeKind::Connection
                    && (self.endpoint_matches(node.id, name) || self.endpoint_matches(dst, name))
                {
                    out.push((node.name.clone(), self.name(dst).to_string()));
                }
            }
        }
        out.sort();
        out
    }

    /// Connection sources feeding `dest`.
    pub fn get_sources(&self, dest: &str) -> Vec<String> {
        self.id_of(dest)
            .map(|id| {
                self.predecessors(id)
                    .filter(|(_, k)| *k == EdgeKind::Connection)
                    .map(|(p, _)| self.name(p).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn boundary_vars(&self, io: Io) -> Vec<String> {
        self.nodes()
            .filter(|n| matches!(&n.kind, NodeKind::Variable { meta, boundary: true } if meta.io == io))
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn get_boundary_inputs(&self) -> Vec<String> {
        self.boundary_vars(Io::In)
    }

    pub fn get_boundary_outputs(&self) -> Vec<String> {
        self.boundary_vars(Io::Out)
    }

    /// Inputs of `comp` that are themselves connection sources.
    pub fn list_input_outputs(&self, comp: &str) -> Vec<String> {
        let Some(cid) = self.id_of(comp) else {
            return Vec::new();
        };
        let mut out: Vec<String> = self
            .nodes()
            .filter(|n| n.owner == Some(cid) && matches!(n.var_io(), Some((Io::In, _))))
            .filter(|n| self.successors(n.id).any(|(_, k)| k == EdgeKind::Connection))
            .map(|n| n.name.clone())
            .collect();
        out.sort();
        out
    }

    /// Component names (pseudo-components included).
    pub fn component_names(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.is_component())
            .map(|n| n.name.clone())
            .collect()
    }

    /// Projection onto components and drivers: `A -> B` when any variable of
    /// `A` (or `A` itself) reaches `B` through variable nodes only.
    pub fn component_graph(&self) -> ComponentGraph {
        let mut cgraph = ComponentGraph::new();
        for node in self.nodes().filter(|n| n.is_component() || n.is_driver()) {
            cgraph.add_node(&node.name);
            let mut stack: Vec<NodeId> = vec![node.id];
            stack.extend(self.nodes().filter(|n| n.owner == Some(node.id)).map(|n| n.id));
            let mut seen: BTreeSet<NodeId> = stack.iter().copied().collect();
            while let Some(cur) = stack.pop() {
                for (next, _) in self.successors(cur) {
                    let Some(n) = self.node(next) else { continue };
                    if n.is_var() {
                        if seen.insert(next) {
                            stack.push(next);
                        }
                    } else if next != node.id {
                        cgraph.add_edge(&node.name, &n.name);
                    }
                }
            }
        }
        cgraph
    }

    /// Components lying on some path from `start` to `end` in the component graph.
    pub fn find_all_connecting(&self, start: &str, end: &str) -> BTreeSet<String> {
        self.component_graph().find_all_connecting(start, end)
    }

    /// Copy restricted to `comps`, their variables, and the edges among them.
    pub fn full_subgraph(&self, comps: &[&str]) -> VariableGraph {
        let keep_ids: BTreeSet<NodeId> = comps.iter().filter_map(|c| self.id_of(c)).collect();
        let mut sub = self.clone();
        let doomed: Vec<NodeId> = self
            .nodes()
            .filter(|n| {
                let owner = if n.is_component() { Some(n.id) } else { n.owner };
                !owner.is_some_and(|o| keep_ids.contains(&o))
            })
            .map(|n| n.id)
            .collect();
        for id in doomed {
            sub.remove_node(id);
        }
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(g: &mut VariableGraph, name: &str, ins: &[&str], outs: &[&str]) {
        let mut vars: Vec<VarMeta> = ins.iter().map(|v| VarMeta::input(*v)).collect();
        vars.extend(outs.iter().map(|v| VarMeta::output(*v)));
        g.add_component(name, &vars, false).unwrap();
    }

    fn sample() -> VariableGraph {
        let mut g = VariableGraph::new();
        comp(&mut g, "A", &["a", "b"], &["c", "d"]);
        comp(&mut g, "B", &["a", "b"], &["c", "d"]);
        g.add_boundary_var(VarMeta::input("a")).unwrap();
        g.add_boundary_var(VarMeta::output("c")).unwrap();
        g
    }

    #[test]
    fn base_var_rules() {
        let g = sample();
        assert_eq!(g.base_var("a.x[3].y"), "a");
        assert_eq!(g.base_var("A.c[2]"), "A.c");
        assert_eq!(g.base_var("B.a.x.y"), "B.a");
        assert_eq!(g.base_var("A.c"), "A.c");
    }

    #[test]
    fn structural_edge_directions() {
        let g = sample();
        let edges = g.edges();
        assert!(edges.contains(&("A.a".into(), "A".into(), EdgeKind::Structural)));
        assert!(edges.contains(&("A".into(), "A.c".into(), EdgeKind::Structural)));
    }

    #[test]
    fn subvar_directions() {
        let mut g = VariableGraph::new();
        g.add_component(
            "B",
            &[
                VarMeta::input("b").with_shape([3]),
                VarMeta::output("c").with_shape([3]),
            ],
            false,
        )
        .unwrap();
        g.add_boundary_var(VarMeta::input("b").with_shape([3])).unwrap();
        g.add_boundary_var(VarMeta::output("c").with_shape([3])).unwrap();
        for p in ["B.b[1]", "b[1]", "B.c[1]", "c[1]"] {
            g.ensure_subvar(p).unwrap();
        }
        let edges = g.edges();
        let has = |s: &str, d: &str| edges.iter().any(|(a, b, _)| a == s && b == d);
        assert!(has("B.b[1]", "B.b"));
        assert!(has("b", "b[1]"));
        assert!(has("B.c", "B.c[1]"));
        assert!(has("c[1]", "c"));
    }

    #[test]
    fn already_connected_and_same_component() {
        let mut g = sample();
        g.connect("A.c", "B.a").unwrap();
        let err = g.connect("A.d", "B.a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Connection error: 'B.a' is already connected to source 'A.c'"
        );
        let err = g.connect("A.c", "A.a").unwrap_err();
        assert!(err.to_string().contains("refer to the same component"));
        let err = g.connect("A.c", "B.c").unwrap_err();
        assert!(err.to_string().contains("is an output"));
        assert!(matches!(
            g.connect("A.zz", "B.b"),
            Err(GraphError::UnresolvedPath { .. })
        ));
        assert_eq!(g.list_connections(), vec![("A.c".into(), "B.a".into())]);
    }

    #[test]
    fn base_and_subvar_destinations_exclude_each_other() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("x"), VarMeta::output("y")], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("v").with_shape([4])], false)
            .unwrap();
        g.connect("A.x", "B.v[1]").unwrap();
        g.connect("A.y", "B.v[2]").unwrap();
        let err = g.connect("A.x", "B.v").unwrap_err();
        assert!(err.to_string().contains("'B.v[1]' is already connected"));
    }

    #[test]
    fn component_graph_projection() {
        let mut g = sample();
        g.connect("A.c", "B.a").unwrap();
        g.connect("a", "A.a").unwrap();
        g.connect("B.c", "c").unwrap();
        let cg = g.component_graph();
        assert_eq!(cg.edges(), vec![("A".into(), "B".into())]);
    }

    #[test]
    fn input_used_as_output_orders_components() {
        let mut g = sample();
        g.connect("A.a", "B.a").unwrap();
        assert_eq!(g.list_input_outputs("A"), vec!["A.a".to_string()]);
        assert!(g.component_graph().contains_edge("A", "B"));
    }

    #[test]
    fn disconnect_component_drops_subvars() {
        let mut g = VariableGraph::new();
        g.add_component("A", &[VarMeta::output("out").with_shape([4])], false)
            .unwrap();
        g.add_component("B", &[VarMeta::input("in").with_shape([4])], false)
            .unwrap();
        let before = g.node_count();
        g.connect("A.out[1]", "B.in[2]").unwrap();
        assert_eq!(g.node_count(), before + 2);
        let removed = g.disconnect("A.out", None).unwrap();
        assert_eq!(removed, vec![("A.out[1]".into(), "B.in[2]".into())]);
        assert_eq!(g.node_count(), before);
        assert!(g.list_connections().is_empty());
    }

    #[test]
    fn remove_component_cascades() {
        let mut g = sample();
        g.connect("A.c", "B.a").unwrap();
        g.connect("a", "A.a").unwrap();
        let removed = g.remove("A").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!g.contains("A"));
        assert!(!g.contains("A.c"));
        assert!(g.list_connections().is_empty());
        assert!(g.contains("B.a"));
    }

    #[test]
    fn driver_edges_close_the_loop() {
        let mut g = sample();
        g.connect("A.c", "B.a").unwrap();
        g.add_driver("driver", &["A.a".into()], &["B.c".into()])
            .unwrap();
        let cg = g.component_graph();
        assert!(cg.contains_edge("driver", "A"));
        assert!(cg.contains_edge("B", "driver"));
        assert!(!cg.is_acyclic());
    }

    #[test]
    fn full_subgraph_keeps_internal_edges() {
        let mut g = sample();
        g.connect("A.c", "B.a").unwrap();
        g.connect("a", "A.a").unwrap();
        let sub = g.full_subgraph(&["A", "B"]);
        assert!(!sub.contains("a"));
        assert_eq!(sub.list_connections(), vec![("A.c".into(), "B.a".into())]);
    }
}
