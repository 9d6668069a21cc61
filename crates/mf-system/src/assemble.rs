//! Turns a reduced graph into a tree of Systems.

use std::collections::{BTreeMap, BTreeSet};

use mf_graph::{CompRole, ComponentGraph, RNode, ReducedGraph};
use tracing::{debug, info, warn};

use crate::error::{SystemError, SystemResult};
use crate::system::{Leaf, System};

/// A component-graph edge removed to break a cycle. The consumer reads the
/// producer's previous value and the solver closes the loop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeveredEdge {
    pub src: String,
    pub dst: String,
}

/// Leaf that owns a driver parameter's storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLeaf {
    pub name: String,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyOptions {
    /// Group independent branches into Parallel systems.
    pub parallel: bool,
    /// Components the driver iterates, in preferred order. `None` means
    /// every component.
    pub workflow: Option<Vec<String>>,
    /// Parameter targets of the driver.
    pub params: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub root: System,
    /// Components outside the workflow that feed it, run once before the
    /// driver starts.
    pub prepass: Option<System>,
    pub severed: Vec<SeveredEdge>,
    pub params: Vec<ParamLeaf>,
    /// Acyclic component graph the root was built from.
    pub graph: ComponentGraph,
}

/// Remove edges until `cg` is acyclic.
///
/// In each strongly connected component the member earliest in `preferred`
/// (then by name) anchors the loop; its incoming edges from the same
/// component are cut. Repeats until no cycle is left.
pub fn sever_cycles(cg: &mut ComponentGraph, preferred: &[String]) -> SystemResult<Vec<SeveredEdge>> {
    let rank = |name: &str| preferred.iter().position(|p| p == name).unwrap_or(usize::MAX);
    let mut severed = Vec::new();
    loop {
        let cycles: Vec<Vec<String>> = cg
            .strongly_connected_components()
            .into_iter()
            .filter(|c| c.len() > 1)
            .collect();
        if cycles.is_empty() {
            break;
        }
        for scc in cycles {
            let Some(anchor) = scc.iter().min_by_key(|n| (rank(n), (*n).clone())) else {
                continue;
            };
            let members: BTreeSet<&str> = scc.iter().map(String::as_str).collect();
            for p in cg.predecessors(anchor) {
                if members.contains(p.as_str()) && cg.remove_edge(&p, anchor) {
                    warn!(src = p.as_str(), dst = anchor.as_str(), "severed feedback edge");
                    severed.push(SeveredEdge {
                        src: p,
                        dst: anchor.clone(),
                    });
                }
            }
        }
    }
    if !cg.is_acyclic() {
        return Err(SystemError::Invariant {
            what: "component graph still cyclic after severing".into(),
        });
    }
    Ok(severed)
}

struct TreeBuilder<'a> {
    cg: &'a ComponentGraph,
    order: &'a [String],
    roles: &'a BTreeMap<String, CompRole>,
    counter: usize,
}

impl TreeBuilder<'_> {
    fn name(&mut self, kind: &str) -> String {
        self.counter += 1;
        format!("_{kind}_{}", self.counter)
    }

    fn leaf(&self, name: &str) -> System {
        let role = self.roles.get(name).copied().unwrap_or(CompRole::Component);
        System::leaf(Leaf::new(name, role))
    }

    fn position(&self, group: &BTreeSet<String>) -> usize {
        self.order
            .iter()
            .position(|n| group.contains(n))
            .unwrap_or(usize::MAX)
    }

    fn flat(&mut self) -> System {
        let children = self.order.iter().map(|n| self.leaf(n)).collect();
        System::serial("root", children)
    }

    /// Parallel over independent groups, otherwise Serial over
    /// longest-path layers.
    fn build(&mut self, nodes: &BTreeSet<String>) -> System {
        let order = self.order;
        let ordered: Vec<&String> = order.iter().filter(|n| nodes.contains(*n)).collect();
        if let [only] = ordered.as_slice() {
            return self.leaf(only);
        }
        let sub = self.cg.subgraph(nodes);
        let mut groups = sub.weakly_connected_components();
        if groups.len() > 1 {
            groups.sort_by_key(|g| self.position(g));
            let children = groups.iter().map(|g| self.build(g)).collect();
            let name = self.name("parallel");
            return System::parallel(name, children);
        }

        let mut level: BTreeMap<&str, usize> = BTreeMap::new();
        for n in &ordered {
            let l = sub
                .predecessors(n)
                .iter()
                .filter_map(|p| level.get(p.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(n.as_str(), l);
        }
        let depth = level.values().copied().max().map_or(0, |d| d + 1);
        let mut layers = vec![BTreeSet::new(); depth];
        for (n, l) in &level {
            layers[*l].insert(n.to_string());
        }
        let children = layers.iter().map(|layer| self.build(layer)).collect();
        let name = self.name("serial");
        System::serial(name, children)
    }
}

fn build_root(cg: &ComponentGraph, order: &[String], roles: &BTreeMap<String, CompRole>, parallel: bool) -> System {
    let mut b = TreeBuilder {
        cg,
        order,
        roles,
        counter: 0,
    };
    if !parallel {
        return b.flat();
    }
    let all: BTreeSet<String> = order.iter().cloned().collect();
    let mut root = b.build(&all);
    root.name = "root".into();
    // A lone leaf still gets a Serial root so the tree shape is uniform.
    if matches!(root.kind, crate::system::SystemKind::Leaf(_)) {
        root = System::serial("root", vec![root]);
    }
    root
}

/// Build the System tree for a reduced graph.
pub fn assemble_systems(rg: &ReducedGraph, opts: &AssemblyOptions) -> SystemResult<Assembly> {
    let mut cg = rg.component_graph();
    let mut roles: BTreeMap<String, CompRole> = rg.comps().map(|(n, r)| (n.to_string(), r)).collect();
    for (name, role) in rg.comps() {
        if role == CompRole::Driver {
            cg.remove_node(name);
        }
    }

    let mut params = Vec::with_capacity(opts.params.len());
    for (i, target) in opts.params.iter().enumerate() {
        let cv = rg.collapsed(target).ok_or_else(|| {
            SystemError::config(format!(
                "parameter target '{target}' is not part of the reduced model"
            ))
        })?;
        let name = format!("_param_{i}");
        cg.add_node(&name);
        for s in rg.successors(&RNode::Var(cv.clone())) {
            if let RNode::Comp(c) = s
                && rg.role(c) != Some(CompRole::Driver)
            {
                cg.add_edge(&name, c);
            }
        }
        roles.insert(name.clone(), CompRole::Param);
        params.push(ParamLeaf {
            name,
            target: target.clone(),
        });
    }

    // Workflow membership: stubs, pseudo-components and parameters always
    // belong; other components only when listed.
    let workflow: Vec<String> = opts.workflow.clone().unwrap_or_default();
    let listed: BTreeSet<&str> = workflow.iter().map(String::as_str).collect();
    let (members, outside): (BTreeSet<String>, BTreeSet<String>) = cg
        .nodes()
        .into_iter()
        .partition(|n| {
            opts.workflow.is_none()
                || roles.get(n) != Some(&CompRole::Component)
                || listed.contains(n.as_str())
        });
    let mut upstream = BTreeSet::new();
    for m in &members {
        upstream.extend(cg.ancestors(m).into_iter().filter(|a| outside.contains(a)));
    }
    for skipped in outside.difference(&upstream) {
        debug!(component = skipped.as_str(), "not executed: outside workflow");
    }

    let mut main = cg.subgraph(&members);
    let mut severed = sever_cycles(&mut main, &workflow)?;
    let order = main.topological_sort(&workflow)?;
    if order.is_empty() {
        return Err(SystemError::config("no components to execute"));
    }
    let root = build_root(&main, &order, &roles, opts.parallel);

    let prepass = if upstream.is_empty() {
        None
    } else {
        let mut pre = cg.subgraph(&upstream);
        severed.extend(sever_cycles(&mut pre, &workflow)?);
        let pre_order = pre.topological_sort(&workflow)?;
        let mut sys = build_root(&pre, &pre_order, &roles, false);
        sys.name = "prepass".into();
        Some(sys)
    };

    info!(
        components = order.len(),
        severed = severed.len(),
        tree = root.describe().as_str(),
        "assembled systems"
    );
    Ok(Assembly {
        root,
        prepass,
        severed,
        params,
        graph: main,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cg(nodes: &[&str], edges: &[(&str, &str)]) -> ComponentGraph {
        ComponentGraph::from_edges(nodes.iter().copied(), edges.iter().copied())
    }

    fn tree(g: &ComponentGraph, parallel: bool) -> System {
        let order = g.topological_sort(&[]).unwrap();
        build_root(g, &order, &BTreeMap::new(), parallel)
    }

    #[test]
    fn diamond_gets_parallel_middle() {
        let g = cg(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        assert_eq!(tree(&g, true).describe(), "serial(a, parallel(b, c), d)");
        assert_eq!(tree(&g, false).describe(), "serial(a, b, c, d)");
    }

    #[test]
    fn independent_chains_run_in_parallel() {
        let g = cg(&["a", "b", "c", "d"], &[("a", "b"), ("c", "d")]);
        assert_eq!(
            tree(&g, true).describe(),
            "parallel(serial(a, b), serial(c, d))"
        );
    }

    #[test]
    fn single_component_tree() {
        let g = cg(&["a"], &[]);
        assert_eq!(tree(&g, true).describe(), "serial(a)");
    }

    #[test]
    fn severing_prefers_workflow_anchor() {
        let mut g = cg(&["d1", "d2"], &[("d1", "d2"), ("d2", "d1")]);
        let cut = sever_cycles(&mut g, &["d1".into(), "d2".into()]).unwrap();
        assert_eq!(
            cut,
            vec![SeveredEdge {
                src: "d2".into(),
                dst: "d1".into()
            }]
        );
        assert!(g.is_acyclic());

        let mut g = cg(&["d1", "d2"], &[("d1", "d2"), ("d2", "d1")]);
        let cut = sever_cycles(&mut g, &["d2".into()]).unwrap();
        assert_eq!(cut[0].dst, "d2");
    }

    #[test]
    fn nested_cycles_are_all_broken() {
        let mut g = cg(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "c"), ("c", "b"), ("c", "a")],
        );
        let cut = sever_cycles(&mut g, &[]).unwrap();
        assert!(g.is_acyclic());
        assert!(!cut.is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn leaf_order_is_topological(edges in prop::collection::vec((0usize..8, 0usize..8), 0..20)) {
            let names: Vec<String> = (0..8).map(|i| format!("c{i}")).collect();
            let mut g = ComponentGraph::new();
            for n in &names {
                g.add_node(n);
            }
            for (a, b) in edges {
                if a < b {
                    g.add_edge(&names[a], &names[b]);
                }
            }
            let order = g.topological_sort(&[]).unwrap();
            let root = build_root(&g, &order, &BTreeMap::new(), true);
            let leaves = root.leaf_order();
            prop_assert_eq!(leaves.len(), names.len());
            let pos = |n: &str| leaves.iter().position(|l| l == n).unwrap();
            for (a, b) in g.edges() {
                prop_assert!(pos(&a) < pos(&b));
            }
        }

        #[test]
        fn severing_always_yields_acyclic(edges in prop::collection::vec((0usize..6, 0usize..6), 0..20)) {
            let names: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
            let mut g = ComponentGraph::new();
            for n in &names {
                g.add_node(n);
            }
            for (a, b) in edges {
                if a != b {
                    g.add_edge(&names[a], &names[b]);
                }
            }
            let before = g.edges().len();
            let cut = sever_cycles(&mut g, &names).unwrap();
            prop_assert!(g.is_acyclic());
            prop_assert_eq!(g.edges().len() + cut.len(), before);
        }
    }
}
