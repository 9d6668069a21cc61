use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;

use mf_components::{BoundaryStore, Component, ExecComp, handle, lock};
use mf_core::{NormKind, VarMeta};
use mf_graph::{ReduceRequest, VariableGraph, reduce_graph};
use mf_system::{AssemblyOptions, Bindings, RunContext, SlotKind, SystemError, build_plan};

fn add(g: &mut VariableGraph, comps: &mut BTreeMap<String, mf_components::ComponentHandle>, name: &str, eqs: &[&str]) {
    let c = ExecComp::new(eqs).unwrap();
    g.add_component(name, c.variables(), false).unwrap();
    comps.insert(name.to_string(), handle(c));
}

fn keep(names: &[&str]) -> ReduceRequest {
    ReduceRequest {
        keep: names.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn chain_propagates_boundary_input() {
    let mut g = VariableGraph::new();
    let mut comps = BTreeMap::new();
    add(&mut g, &mut comps, "a", &["y = 2*x"]);
    add(&mut g, &mut comps, "b", &["z = y + 1"]);
    g.add_boundary_var(VarMeta::input("x")).unwrap();
    g.connect("x", "a.x").unwrap();
    g.connect("a.y", "b.y").unwrap();

    let mut store = BoundaryStore::new();
    store.declare(VarMeta::input("x")).unwrap();
    store.set("x", &[3.0]).unwrap();
    let bindings = Bindings::new(comps, handle(store));

    let rg = reduce_graph(&g, &keep(&["b.z"])).unwrap();
    let mut plan = build_plan(&rg, &bindings, &AssemblyOptions::default(), &[], 1).unwrap();
    assert!(plan.severed().is_empty());
    assert_eq!(plan.root().leaf_order(), vec!["x", "a", "b"]);

    plan.load(&bindings).unwrap();
    let stop = AtomicBool::new(false);
    plan.run(&RunContext::new(&stop)).unwrap();
    assert_eq!(plan.value("b.z"), Some(&[7.0][..]));
    assert_eq!(plan.value("b.y"), Some(&[6.0][..]));
    assert_eq!(plan.residual_norm(NormKind::Infinity), 0.0);

    let comp = lock(&bindings.comps["b"]).unwrap();
    assert_eq!(comp.get("z").unwrap(), &[7.0]);
}

#[test]
fn coupled_pair_is_severed_and_iterates_to_its_fixed_point() {
    let mut g = VariableGraph::new();
    let mut comps = BTreeMap::new();
    add(&mut g, &mut comps, "a", &["y1 = 0.5*y2 + 1"]);
    add(&mut g, &mut comps, "b", &["y2 = 0.5*y1"]);
    g.connect("a.y1", "b.y1").unwrap();
    g.connect("b.y2", "a.y2").unwrap();
    let bindings = Bindings::new(comps, handle(BoundaryStore::new()));

    let rg = reduce_graph(&g, &ReduceRequest::default()).unwrap();
    let mut plan = build_plan(&rg, &bindings, &AssemblyOptions::default(), &[], 1).unwrap();
    assert_eq!(plan.severed().len(), 1);
    assert_eq!(plan.severed()[0].dst, "a");
    let fb = plan.layout().slot_of("b.y2").unwrap().clone();
    assert_eq!(fb.kind, SlotKind::Feedback);

    plan.load(&bindings).unwrap();
    let stop = AtomicBool::new(false);
    let ctx = RunContext::new(&stop);
    for _ in 0..60 {
        plan.run(&ctx).unwrap();
        let unknowns = plan.unknown_entries();
        let vecs = plan.vecs_mut();
        for i in unknowns {
            let step = vecs.f[i];
            vecs.u[i] += step;
        }
    }
    plan.run(&ctx).unwrap();
    assert!(plan.residual_norm(NormKind::Infinity) < 1e-12);
    assert!((plan.value("a.y1").unwrap()[0] - 4.0 / 3.0).abs() < 1e-10);
    assert!((plan.value("b.y2").unwrap()[0] - 2.0 / 3.0).abs() < 1e-10);

    let op = plan.linearize(&BTreeSet::new()).unwrap().to_dense();
    let y1 = plan.layout().slot_of("a.y1").unwrap().offset;
    let y2 = fb.offset;
    assert!((op[(y1, y1)] - 1.0).abs() < 1e-12);
    assert!((op[(y1, y2)] + 0.5).abs() < 1e-12);
    assert!((op[(y2, y1)] + 0.5).abs() < 1e-12);
    assert!((op[(y2, y2)] - 1.0).abs() < 1e-12);
}

#[test]
fn parallel_branches_match_serial_results() {
    let build = |parallel: bool| {
        let mut g = VariableGraph::new();
        let mut comps = BTreeMap::new();
        add(&mut g, &mut comps, "src", &["y = x + 1"]);
        add(&mut g, &mut comps, "left", &["y = 2*x"]);
        add(&mut g, &mut comps, "right", &["y = 3*x"]);
        add(&mut g, &mut comps, "sum", &["y = l + r"]);
        g.connect("src.y", "left.x").unwrap();
        g.connect("src.y", "right.x").unwrap();
        g.connect("left.y", "sum.l").unwrap();
        g.connect("right.y", "sum.r").unwrap();
        lock(&comps["src"]).unwrap().set("x", &[1.0]).unwrap();
        let bindings = Bindings::new(comps, handle(BoundaryStore::new()));
        let rg = reduce_graph(&g, &keep(&["sum.y"])).unwrap();
        let opts = AssemblyOptions {
            parallel,
            ..Default::default()
        };
        let mut plan = build_plan(&rg, &bindings, &opts, &[], 4).unwrap();
        plan.load(&bindings).unwrap();
        let stop = AtomicBool::new(false);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        plan.run(&RunContext::new(&stop).with_pool(&pool)).unwrap();
        let pooled = plan.value("sum.y").unwrap().to_vec();
        // Same tree on the caller's threads when no pool is attached.
        plan.run(&RunContext::new(&stop)).unwrap();
        assert_eq!(plan.value("sum.y").unwrap(), &pooled[..]);
        (plan.root().describe(), pooled)
    };
    let (serial_tree, serial) = build(false);
    let (parallel_tree, parallel) = build(true);
    assert!(parallel_tree.contains("parallel(left, right)"), "{parallel_tree}");
    assert!(!serial_tree.contains("parallel"));
    assert_eq!(serial, vec![10.0]);
    assert_eq!(parallel, serial);
}

/// `y = 2*x` reporting a Jacobian one column too wide.
struct WideJacobian {
    store: mf_components::VarStore,
}

impl Component for WideJacobian {
    fn variables(&self) -> &[VarMeta] {
        self.store.metas()
    }

    fn get(&self, name: &str) -> mf_components::ComponentResult<&[f64]> {
        self.store.get(name)
    }

    fn set(&mut self, name: &str, value: &[f64]) -> mf_components::ComponentResult<()> {
        self.store.set(name, value)
    }

    fn execute(&mut self) -> mf_components::ComponentResult<()> {
        let x = self.store.scalar("x")?;
        self.store.set("y", &[2.0 * x])
    }

    fn provide_jacobian(&mut self) -> mf_components::ComponentResult<Option<mf_components::LocalJacobian>> {
        Ok(Some(mf_components::LocalJacobian {
            inputs: vec!["x".into()],
            outputs: vec!["y".into()],
            matrix: nalgebra::DMatrix::zeros(1, 2),
        }))
    }
}

#[test]
fn misshapen_component_jacobian_fails_linearization() {
    let mut g = VariableGraph::new();
    let mut comps = BTreeMap::new();
    let wide = WideJacobian {
        store: mf_components::VarStore::new(vec![VarMeta::input("x"), VarMeta::output("y")]),
    };
    g.add_component("w", wide.variables(), false).unwrap();
    comps.insert("w".to_string(), handle(wide));
    add(&mut g, &mut comps, "b", &["z = y"]);
    g.connect("w.y", "b.y").unwrap();
    let bindings = Bindings::new(comps, handle(BoundaryStore::new()));

    let rg = reduce_graph(&g, &keep(&["b.z"])).unwrap();
    let mut plan = build_plan(&rg, &bindings, &AssemblyOptions::default(), &[], 1).unwrap();
    plan.load(&bindings).unwrap();
    let stop = AtomicBool::new(false);
    plan.run(&RunContext::new(&stop)).unwrap();

    match plan.linearize(&BTreeSet::new()) {
        Err(SystemError::Execution { path, .. }) => assert_eq!(path, "w"),
        other => panic!("expected an execution error, got {other:?}"),
    }
}
