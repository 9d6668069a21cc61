//! Expression-level connections and pseudo-component synthesis.
//!
//! Users connect expressions (`"A.x * 2 + 1" -> "B.y"`) and variables with
//! differing units. The mapper records every user-level connection and, when
//! a plain copy is not enough, registers a pseudo-component in the
//! [`VariableGraph`] that computes the value and wires it in between.

use std::collections::BTreeMap;

use mf_core::{UnitConversion, VarMeta, conversion};
use mf_expr::Expression;
use mf_expr::expression::path_refers_to;
use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::graph::VariableGraph;

/// Output slot name of every pseudo-component.
pub const PSEUDO_OUTPUT: &str = "out0";

/// Name prefix reserved for synthesized pseudo-components.
pub const PSEUDO_PREFIX: &str = "_pseudo_";

/// Computation carried by a pseudo-component.
#[derive(Debug, Clone, PartialEq)]
pub enum PseudoKind {
    /// Scalar expression over slots `in0..inK`.
    Expression(Expression),
    /// Element-wise affine unit conversion of `in0`.
    UnitConversion(UnitConversion),
}

/// Everything needed to instantiate a pseudo-component at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct PseudoSpec {
    pub name: String,
    pub kind: PseudoKind,
    /// Declared slots: inputs `in0..inK` then the output `out0`.
    pub vars: Vec<VarMeta>,
    /// `(slot, source path)` for each input slot.
    pub inputs: Vec<(String, String)>,
    pub dest: String,
}

#[derive(Debug, Clone)]
struct ExprConnection {
    src: Expression,
    dest: String,
    pseudo: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExprMapper {
    conns: Vec<ExprConnection>,
    pseudo_count: usize,
}

impl ExprMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `src` (any expression) to `dest` (a variable path).
    ///
    /// Returns the pseudo-component spec when one had to be synthesized.
    /// On error the graph is left untouched.
    pub fn connect(&mut self, graph: &mut VariableGraph, src: &str, dest: &str) -> GraphResult<Option<PseudoSpec>> {
        let src_expr = Expression::parse(src)?;
        let dest_expr = Expression::parse(dest)?;
        let Some(dest_path) = dest_expr.as_var() else {
            return Err(GraphError::connection(format!(
                "destination '{dest}' must be a single variable"
            )));
        };
        let dest_path = dest_path.to_string();

        let kind = match src_expr.as_var() {
            Some(src_path) => {
                graph.check_connect(src_path, &dest_path)?;
                match self.unit_conversion(graph, src_path, &dest_path)? {
                    None => {
                        graph.connect(src_path, &dest_path)?;
                        self.conns.push(ExprConnection {
                            src: src_expr,
                            dest: dest_path,
                            pseudo: None,
                        });
                        return Ok(None);
                    }
                    Some(conv) => PseudoKind::UnitConversion(conv),
                }
            }
            None => PseudoKind::Expression(src_expr.clone()),
        };
        self.check_expression_connect(graph, &src_expr, &dest_path)?;
        let spec = self.build_pseudo(graph, &src_expr, &dest_path, kind)?;
        let saved = graph.clone();
        if let Err(e) = self.wire_pseudo(graph, &spec) {
            *graph = saved;
            return Err(e);
        }
        self.pseudo_count += 1;
        self.conns.push(ExprConnection {
            src: src_expr,
            dest: dest_path,
            pseudo: Some(spec.name.clone()),
        });
        debug!(pseudo = spec.name.as_str(), src, dest, "synthesized pseudo-component");
        Ok(Some(spec))
    }

    /// Conversion needed between the declared units of two variables, if any.
    fn unit_conversion(&self, graph: &VariableGraph, src: &str, dest: &str) -> GraphResult<Option<UnitConversion>> {
        let su = graph.var_meta(src).and_then(|m| m.units.clone());
        let du = graph.var_meta(dest).and_then(|m| m.units.clone());
        let (Some(su), Some(du)) = (su, du) else {
            return Ok(None);
        };
        let conv = conversion(&su, &du).map_err(|e| {
            GraphError::connection(format!("can't connect '{src}' to '{dest}': {e}"))
        })?;
        Ok((!conv.is_identity()).then_some(conv))
    }

    fn check_expression_connect(&self, graph: &VariableGraph, src: &Expression, dest: &str) -> GraphResult<()> {
        let refs = src.referenced_varpaths();
        if refs.is_empty() {
            return Err(GraphError::connection(format!(
                "source '{}' references no variables",
                src.text()
            )));
        }
        let dest_comp = graph
            .node_by_name(&graph.base_var(dest))
            .and_then(|n| n.owner)
            .and_then(|o| graph.node(o))
            .map(|n| n.name.clone());
        for r in &refs {
            if graph.node_by_name(r).is_some_and(|n| !n.is_var()) {
                return Err(GraphError::connection(format!("'{r}' is not a variable")));
            }
            if graph.var_meta(r).is_none() {
                return Err(GraphError::UnresolvedPath { path: r.clone() });
            }
        }
        if let Some(dc) = dest_comp
            && src.referenced_compnames().contains(&dc)
        {
            return Err(GraphError::connection(format!(
                "'{}' and '{dest}' refer to the same component.",
                src.text()
            )));
        }
        if graph.var_meta(dest).is_none() {
            return Err(GraphError::UnresolvedPath {
                path: dest.to_string(),
            });
        }
        graph.check_dest_free(dest)
    }

    fn build_pseudo(&mut self, graph: &VariableGraph, src: &Expression, dest: &str, kind: PseudoKind) -> GraphResult<PseudoSpec> {
        let mut name = format!("{PSEUDO_PREFIX}{}", self.pseudo_count);
        while graph.contains(&name) {
            self.pseudo_count += 1;
            name = format!("{PSEUDO_PREFIX}{}", self.pseudo_count);
        }
        let refs = src.referenced_varpaths();
        let mut vars = Vec::with_capacity(refs.len() + 1);
        let mut inputs = Vec::with_capacity(refs.len());
        let mut slot_names = BTreeMap::new();
        for (i, r) in refs.iter().enumerate() {
            let slot = format!("in{i}");
            let size = graph.path_size(r)?;
            let mut meta = VarMeta::input(slot.clone());
            if size != 1 {
                meta = meta.with_shape([size]);
            }
            if matches!(kind, PseudoKind::UnitConversion(_)) {
                meta.units = graph.var_meta(r).and_then(|m| m.units.clone());
            }
            vars.push(meta);
            slot_names.insert(r.clone(), slot.clone());
            inputs.push((slot, r.clone()));
        }
        let out_size = graph.path_size(dest)?;
        let mut out = VarMeta::output(PSEUDO_OUTPUT);
        if out_size != 1 {
            out = out.with_shape([out_size]);
        }
        out.units = graph.var_meta(dest).and_then(|m| m.units.clone());
        vars.push(out);
        let kind = match kind {
            PseudoKind::Expression(e) => PseudoKind::Expression(e.renamed(&slot_names)),
            other => other,
        };
        Ok(PseudoSpec {
            name,
            kind,
            vars,
            inputs,
            dest: dest.to_string(),
        })
    }

    fn wire_pseudo(&self, graph: &mut VariableGraph, spec: &PseudoSpec) -> GraphResult<()> {
        graph.add_component(&spec.name, &spec.vars, true)?;
        for (slot, src) in &spec.inputs {
            graph.connect(src, &format!("{}.{slot}", spec.name))?;
        }
        graph.connect(&format!("{}.{PSEUDO_OUTPUT}", spec.name), &spec.dest)
    }

    fn matches(conn: &ExprConnection, path: &str) -> bool {
        conn.src.refers_to(path) || path_refers_to(&conn.dest, path) || {
            let (comp, _) = conn.dest.split_once('.').unwrap_or(("", ""));
            comp == path
        }
    }

    /// Remove user connections touching `path` (or linking `path` and `path2`),
    /// along with their pseudo-components. Returns the removed pseudo names.
    pub fn disconnect(&mut self, graph: &mut VariableGraph, path: &str, path2: Option<&str>) -> GraphResult<Vec<String>> {
        let hit = |c: &ExprConnection| match path2 {
            Some(p2) => {
                (c.src.refers_to(path) && path_refers_to(&c.dest, p2))
                    || (c.src.refers_to(p2) && path_refers_to(&c.dest, path))
                    || c.src.text() == path && c.dest == p2
            }
            None => Self::matches(c, path),
        };
        let (doomed, kept): (Vec<ExprConnection>, Vec<ExprConnection>) =
            std::mem::take(&mut self.conns).into_iter().partition(|c| hit(c));
        self.conns = kept;
        if doomed.is_empty() {
            if let Some(p2) = path2 {
                return Err(GraphError::connection(format!(
                    "'{path}' and '{p2}' are not connected"
                )));
            }
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        for c in doomed {
            match (&c.pseudo, c.src.as_var()) {
                (Some(p), _) => {
                    graph.remove(p)?;
                    removed.push(p.clone());
                }
                (None, Some(src)) => {
                    graph.disconnect(src, Some(&c.dest))?;
                }
                (None, None) => {
                    return Err(GraphError::Invariant {
                        what: format!("expression connection '{}' has no pseudo-component", c.src),
                    });
                }
            }
        }
        Ok(removed)
    }

    /// Remove a component or boundary variable and everything connected to it.
    pub fn remove(&mut self, graph: &mut VariableGraph, name: &str) -> GraphResult<Vec<String>> {
        let removed = self.disconnect(graph, name, None)?;
        graph.remove(name)?;
        Ok(removed)
    }

    /// User-level connections, in declaration order. With `show_pseudo` the
    /// expanded graph-level connections are listed instead.
    pub fn list_connections(&self, graph: &VariableGraph, show_pseudo: bool) -> Vec<(String, String)> {
        if show_pseudo {
            return graph.list_connections();
        }
        self.conns
            .iter()
            .map(|c| (c.src.text().to_string(), c.dest.clone()))
            .collect()
    }

    /// Pseudo-component serving a user connection, if any.
    pub fn pseudo_for(&self, src: &str, dest: &str) -> Option<&str> {
        self.conns
            .iter()
            .find(|c| c.src.text() == src.trim() && c.dest == dest.trim())
            .and_then(|c| c.pseudo.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::Io;

    fn graph() -> VariableGraph {
        let mut g = VariableGraph::new();
        g.add_component(
            "A",
            &[
                VarMeta::output("x").with_units("ft"),
                VarMeta::output("y"),
                VarMeta::output("t").with_units("s"),
            ],
            false,
        )
        .unwrap();
        g.add_component(
            "B",
            &[VarMeta::input("u").with_units("m"), VarMeta::input("v")],
            false,
        )
        .unwrap();
        g
    }

    #[test]
    fn bare_connection_has_no_pseudo() {
        let mut g = graph();
        let mut m = ExprMapper::new();
        assert!(m.connect(&mut g, "A.y", "B.v").unwrap().is_none());
        assert_eq!(m.list_connections(&g, false), vec![("A.y".into(), "B.v".into())]);
    }

    #[test]
    fn expression_synthesizes_pseudo() {
        let mut g = graph();
        let mut m = ExprMapper::new();
        let spec = m.connect(&mut g, "A.y * 2 + A.x", "B.v").unwrap().unwrap();
        assert_eq!(spec.name, "_pseudo_0");
        assert_eq!(
            spec.inputs,
            vec![("in0".into(), "A.y".into()), ("in1".into(), "A.x".into())]
        );
        match &spec.kind {
            PseudoKind::Expression(e) => assert_eq!(e.text(), "in0 * 2 + in1"),
            other => panic!("unexpected {other:?}"),
        }
        let conns = g.list_connections();
        assert!(conns.contains(&("A.y".into(), "_pseudo_0.in0".into())));
        assert!(conns.contains(&("_pseudo_0.out0".into(), "B.v".into())));
        assert_eq!(spec.vars.iter().filter(|v| v.io == Io::In).count(), 2);
    }

    #[test]
    fn unit_mismatch_uses_conversion() {
        let mut g = graph();
        let mut m = ExprMapper::new();
        let spec = m.connect(&mut g, "A.x", "B.u").unwrap().unwrap();
        match spec.kind {
            PseudoKind::UnitConversion(c) => assert!((c.scale - 0.3048).abs() < 1e-12),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(m.pseudo_for("A.x", "B.u"), Some("_pseudo_0"));
    }

    #[test]
    fn incompatible_units_rejected_without_mutation() {
        let mut g = graph();
        let before = g.edges();
        let mut m = ExprMapper::new();
        let err = m.connect(&mut g, "A.t", "B.u").unwrap_err();
        assert!(matches!(err, GraphError::Connection { .. }));
        assert_eq!(g.edges(), before);
    }

    #[test]
    fn destination_must_be_variable() {
        let mut g = graph();
        let mut m = ExprMapper::new();
        assert!(m.connect(&mut g, "A.y", "B.v + 1").is_err());
    }

    #[test]
    fn disconnect_removes_pseudo() {
        let mut g = graph();
        let before = g.edges();
        let mut m = ExprMapper::new();
        m.connect(&mut g, "A.y * 2", "B.v").unwrap();
        let removed = m.disconnect(&mut g, "A.y", None).unwrap();
        assert_eq!(removed, vec!["_pseudo_0".to_string()]);
        assert!(!g.contains("_pseudo_0"));
        assert_eq!(g.edges(), before);
        assert!(m.list_connections(&g, false).is_empty());
    }

    #[test]
    fn second_connection_to_destination_rejected() {
        let mut g = graph();
        let mut m = ExprMapper::new();
        m.connect(&mut g, "A.y", "B.v").unwrap();
        let err = m.connect(&mut g, "A.y * 3", "B.v").unwrap_err();
        assert!(err.to_string().contains("already connected"));
        assert!(!g.contains("_pseudo_0"));
    }

    #[test]
    fn pseudo_names_never_clobber_existing_nodes() {
        let mut g = graph();
        let err = g
            .add_component("_pseudo_0", &[VarMeta::input("q")], false)
            .unwrap_err();
        assert!(matches!(err, GraphError::Connection { .. }));

        let mut first = ExprMapper::new();
        first.connect(&mut g, "A.y * 2", "B.v").unwrap();
        let mut second = ExprMapper::new();
        let spec = second.connect(&mut g, "A.x * 3", "B.u").unwrap().unwrap();
        assert_eq!(spec.name, "_pseudo_1");
        assert!(g.contains("_pseudo_0.in0"));
        let conns = g.list_connections();
        assert!(conns.contains(&("_pseudo_0.out0".into(), "B.v".into())));
        assert!(conns.contains(&("_pseudo_1.out0".into(), "B.u".into())));
    }
}
