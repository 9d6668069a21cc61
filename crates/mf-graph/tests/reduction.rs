use std::collections::BTreeSet;

use mf_core::VarMeta;
use mf_graph::{
    CompRole, ExprMapper, GraphError, PseudoKind, RNode, ReduceRequest, VariableGraph,
    reduce_graph,
};

fn sellar_like() -> (VariableGraph, ExprMapper) {
    let mut g = VariableGraph::new();
    g.add_component(
        "d1",
        &[
            VarMeta::input("z1"),
            VarMeta::input("x1"),
            VarMeta::input("y2"),
            VarMeta::output("y1"),
        ],
        false,
    )
    .unwrap();
    g.add_component(
        "d2",
        &[VarMeta::input("z1"), VarMeta::input("y1"), VarMeta::output("y2")],
        false,
    )
    .unwrap();
    g.add_boundary_var(VarMeta::input("z")).unwrap();
    let mut m = ExprMapper::new();
    m.connect(&mut g, "z", "d1.z1").unwrap();
    m.connect(&mut g, "z", "d2.z1").unwrap();
    m.connect(&mut g, "d1.y1", "d2.y1").unwrap();
    m.connect(&mut g, "d2.y2", "d1.y2").unwrap();
    (g, m)
}

#[test]
fn coupled_pair_forms_a_cycle() {
    let (g, _) = sellar_like();
    let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
    let cg = rg.component_graph();
    assert!(cg.contains_edge("d1", "d2"));
    assert!(cg.contains_edge("d2", "d1"));
    assert!(cg.contains_edge("z", "d1"));
    assert_eq!(rg.role("z"), Some(CompRole::InVar));
    let sccs = cg.strongly_connected_components();
    assert!(sccs.iter().any(|c| c == &vec!["d1".to_string(), "d2".to_string()]));
    // One source feeding two destinations is one node.
    assert_eq!(rg.collapsed("d1.z1"), rg.collapsed("d2.z1"));
}

#[test]
fn expression_connection_gets_a_pseudo_node() {
    let mut g = VariableGraph::new();
    g.add_component("A", &[VarMeta::output("x"), VarMeta::output("y")], false)
        .unwrap();
    g.add_component("B", &[VarMeta::input("v")], false).unwrap();
    let mut m = ExprMapper::new();
    let spec = m.connect(&mut g, "A.x + 2*A.y", "B.v").unwrap().unwrap();
    assert!(matches!(spec.kind, PseudoKind::Expression(_)));
    let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
    assert_eq!(rg.role(&spec.name), Some(CompRole::Pseudo));
    let cg = rg.component_graph();
    assert!(cg.contains_edge("A", &spec.name));
    assert!(cg.contains_edge(&spec.name, "B"));
    assert!(!cg.contains_edge("A", "B"));
}

#[test]
fn overlapping_slices_are_rejected_at_reduction() {
    let mut g = VariableGraph::new();
    g.add_component("A", &[VarMeta::output("out").with_shape([9])], false)
        .unwrap();
    g.add_component("B", &[VarMeta::input("in").with_shape([5])], false)
        .unwrap();
    g.add_component("C", &[VarMeta::input("in").with_shape([6])], false)
        .unwrap();
    g.connect("A.out[:5]", "B.in").unwrap();
    g.connect("A.out[3:]", "C.in").unwrap();
    match reduce_graph(&g, &ReduceRequest::default()) {
        Err(GraphError::Conflict { what }) => {
            assert!(what.contains("A.out[:5]"));
            assert!(what.contains("A.out[3:]"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn request_narrows_and_reduction_is_stable() {
    let (mut g, mut m) = sellar_like();
    g.add_component("post", &[VarMeta::input("y"), VarMeta::output("obj")], false)
        .unwrap();
    m.connect(&mut g, "d1.y1", "post.y").unwrap();
    g.add_component("other", &[VarMeta::output("w")], false).unwrap();

    let req = ReduceRequest {
        inputs: vec!["z".into()],
        outputs: vec!["post.obj".into()],
        keep: BTreeSet::from(["post.obj".to_string()]),
    };
    let rg = reduce_graph(&g, &req).unwrap();
    let comps: Vec<&str> = rg.comps().map(|(n, _)| n).collect();
    assert!(comps.contains(&"post"));
    assert!(!comps.contains(&"other"));
    assert!(rg.successors(&RNode::Comp("post".into())).count() == 1);
    assert_eq!(rg.reduce(&req).unwrap(), rg);
}

#[test]
fn disconnect_restores_reduced_shape() {
    let (mut g, mut m) = sellar_like();
    let before = reduce_graph(&g, &ReduceRequest::default()).unwrap();
    m.connect(&mut g, "d1.y1 * 3", "d2.y1").unwrap_err();
    m.disconnect(&mut g, "d2.y2", Some("d1.y2")).unwrap();
    let after = reduce_graph(&g, &ReduceRequest::default()).unwrap();
    assert!(after.component_graph().is_acyclic());
    m.connect(&mut g, "d2.y2", "d1.y2").unwrap();
    assert_eq!(reduce_graph(&g, &ReduceRequest::default()).unwrap(), before);
}
