//! The execution tree and how it runs.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use mf_components::{Component, ComponentHandle, lock};
use mf_graph::CompRole;
use rayon::prelude::*;
use tracing::trace;

use crate::bindings::Bindings;
use crate::error::{SystemError, SystemResult};
use crate::layout::VecSet;

/// Where a leaf reads one of its inputs from.
#[derive(Debug, Clone, PartialEq)]
pub struct InputLink {
    pub slot: usize,
    pub offset: usize,
    pub size: usize,
    /// Local variable name on the component.
    pub var: String,
    /// Positions inside `var`; `None` for the whole variable.
    pub indices: Option<Vec<usize>>,
}

/// How a leaf publishes one of its outputs or states.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLink {
    pub slot: usize,
    pub offset: usize,
    pub size: usize,
    pub var: String,
    pub indices: Option<Vec<usize>>,
    pub mode: OutputMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// `u = F`, `f = 0`.
    Explicit,
    /// `f = F - u`.
    Feedback,
    /// Component state: `u` is pushed into the component, `f = -R`.
    State { residual: String },
}

/// Gather/scatter instructions of one leaf.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScatterPlan {
    pub inputs: Vec<InputLink>,
    pub outputs: Vec<OutputLink>,
}

#[derive(Clone)]
pub struct Leaf {
    pub comp: String,
    pub role: CompRole,
    pub handle: Option<ComponentHandle>,
    pub plan: ScatterPlan,
}

impl Leaf {
    pub fn new(comp: &str, role: CompRole) -> Self {
        Self {
            comp: comp.to_string(),
            role,
            handle: None,
            plan: ScatterPlan::default(),
        }
    }

    /// Stubs and parameter leaves move values but never execute.
    pub fn executes(&self) -> bool {
        matches!(self.role, CompRole::Component | CompRole::Pseudo)
    }
}

impl std::fmt::Debug for Leaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("comp", &self.comp)
            .field("role", &self.role)
            .field("bound", &self.handle.is_some())
            .field("plan", &self.plan)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum SystemKind {
    Leaf(Box<Leaf>),
    /// Children run in order.
    Serial(Vec<System>),
    /// Children share no data dependency and may run concurrently.
    Parallel(Vec<System>),
}

#[derive(Debug, Clone)]
pub struct System {
    pub name: String,
    pub kind: SystemKind,
    pub requested_units: usize,
    pub assigned_units: usize,
}

/// Borrowed run-time context handed down the tree.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub stop: &'a AtomicBool,
    pub pool: Option<&'a rayon::ThreadPool>,
}

impl<'a> RunContext<'a> {
    pub fn new(stop: &'a AtomicBool) -> Self {
        Self { stop, pool: None }
    }

    pub fn with_pool(mut self, pool: &'a rayon::ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn check_stop(&self) -> SystemResult<()> {
        if self.stop_requested() {
            return Err(SystemError::Stopped);
        }
        Ok(())
    }
}

fn copy_in(comp: &mut dyn Component, var: &str, indices: &Option<Vec<usize>>, values: &[f64]) -> mf_components::ComponentResult<()> {
    match indices {
        None => comp.set(var, values),
        Some(idx) => {
            let mut full = comp.get(var)?.to_vec();
            for (k, i) in idx.iter().enumerate() {
                if let Some(slot) = full.get_mut(*i) {
                    *slot = values[k];
                }
            }
            comp.set(var, &full)
        }
    }
}

fn copy_out(comp: &dyn Component, var: &str, indices: &Option<Vec<usize>>) -> mf_components::ComponentResult<Vec<f64>> {
    let full = comp.get(var)?;
    Ok(match indices {
        None => full.to_vec(),
        Some(idx) => idx.iter().filter_map(|i| full.get(*i).copied()).collect(),
    })
}

impl System {
    pub fn leaf(leaf: Leaf) -> Self {
        Self {
            name: leaf.comp.clone(),
            kind: SystemKind::Leaf(Box::new(leaf)),
            requested_units: 1,
            assigned_units: 1,
        }
    }

    pub fn serial(name: impl Into<String>, children: Vec<System>) -> Self {
        Self {
            name: name.into(),
            kind: SystemKind::Serial(children),
            requested_units: 1,
            assigned_units: 1,
        }
    }

    pub fn parallel(name: impl Into<String>, children: Vec<System>) -> Self {
        Self {
            name: name.into(),
            kind: SystemKind::Parallel(children),
            requested_units: 1,
            assigned_units: 1,
        }
    }

    pub fn children(&self) -> &[System] {
        match &self.kind {
            SystemKind::Leaf(_) => &[],
            SystemKind::Serial(c) | SystemKind::Parallel(c) => c,
        }
    }

    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'s>(&'s self, out: &mut Vec<&'s Leaf>) {
        match &self.kind {
            SystemKind::Leaf(l) => out.push(l),
            SystemKind::Serial(c) | SystemKind::Parallel(c) => {
                c.iter().for_each(|s| s.collect_leaves(out));
            }
        }
    }

    pub fn leaves_mut(&mut self) -> Vec<&mut Leaf> {
        let mut out = Vec::new();
        self.collect_leaves_mut(&mut out);
        out
    }

    fn collect_leaves_mut<'s>(&'s mut self, out: &mut Vec<&'s mut Leaf>) {
        match &mut self.kind {
            SystemKind::Leaf(l) => out.push(l),
            SystemKind::Serial(c) | SystemKind::Parallel(c) => {
                c.iter_mut().for_each(|s| s.collect_leaves_mut(out));
            }
        }
    }

    /// Component names in execution order.
    pub fn leaf_order(&self) -> Vec<String> {
        self.leaves().into_iter().map(|l| l.comp.clone()).collect()
    }

    /// Vector ranges this subtree writes.
    pub fn owned_ranges(&self) -> Vec<Range<usize>> {
        self.leaves()
            .into_iter()
            .flat_map(|l| l.plan.outputs.iter().map(|o| o.offset..o.offset + o.size))
            .collect()
    }

    /// Compact rendering, e.g. `serial(a, parallel(b, c), d)`.
    pub fn describe(&self) -> String {
        match &self.kind {
            SystemKind::Leaf(l) => l.comp.clone(),
            SystemKind::Serial(c) => format!(
                "serial({})",
                c.iter().map(System::describe).collect::<Vec<_>>().join(", ")
            ),
            SystemKind::Parallel(c) => format!(
                "parallel({})",
                c.iter().map(System::describe).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// Execute the subtree once against `vecs`.
    pub fn run(&mut self, vecs: &mut VecSet, ctx: &RunContext<'_>) -> SystemResult<()> {
        ctx.check_stop()?;
        let assigned = self.assigned_units;
        match &mut self.kind {
            SystemKind::Leaf(leaf) => run_leaf(leaf, vecs),
            SystemKind::Serial(children) => {
                for child in children.iter_mut() {
                    ctx.check_stop()?;
                    child.run(vecs, ctx)?;
                }
                Ok(())
            }
            SystemKind::Parallel(children) if assigned > 1 && children.len() > 1 => {
                let base: &VecSet = vecs;
                let mut job = || {
                    children
                        .par_iter_mut()
                        .map(|child| {
                            let mut local = base.clone();
                            child.run(&mut local, ctx).map(|_| local)
                        })
                        .collect::<SystemResult<Vec<VecSet>>>()
                };
                let results = match ctx.pool {
                    Some(pool) => pool.install(job),
                    None => job(),
                }?;
                for (child, local) in children.iter().zip(results) {
                    for r in child.owned_ranges() {
                        vecs.u.rows_mut(r.start, r.len()).copy_from(&local.u.rows(r.start, r.len()));
                        vecs.f.rows_mut(r.start, r.len()).copy_from(&local.f.rows(r.start, r.len()));
                    }
                }
                Ok(())
            }
            SystemKind::Parallel(children) => {
                for child in children.iter_mut() {
                    ctx.check_stop()?;
                    child.run(vecs, ctx)?;
                }
                Ok(())
            }
        }
    }
}

fn run_leaf(leaf: &mut Leaf, vecs: &mut VecSet) -> SystemResult<()> {
    let Some(handle) = &leaf.handle else {
        return Ok(());
    };
    let path = leaf.comp.as_str();
    let wrap = |e| SystemError::execution(path, e);
    let mut comp = lock(handle).map_err(wrap)?;

    for link in &leaf.plan.inputs {
        let values = vecs.u.as_slice()[link.offset..link.offset + link.size].to_vec();
        copy_in(&mut *comp, &link.var, &link.indices, &values).map_err(wrap)?;
    }
    for link in &leaf.plan.outputs {
        if let OutputMode::State { .. } = link.mode {
            let values = vecs.u.as_slice()[link.offset..link.offset + link.size].to_vec();
            copy_in(&mut *comp, &link.var, &link.indices, &values).map_err(wrap)?;
        }
    }
    if leaf.executes() {
        trace!(component = path, "execute");
        comp.execute().map_err(wrap)?;
    }
    for link in &leaf.plan.outputs {
        let r = link.offset..link.offset + link.size;
        match &link.mode {
            OutputMode::Explicit => {
                let values = copy_out(&*comp, &link.var, &link.indices).map_err(wrap)?;
                vecs.u.as_mut_slice()[r.clone()].copy_from_slice(&values);
                vecs.f.as_mut_slice()[r].fill(0.0);
            }
            OutputMode::Feedback => {
                let values = copy_out(&*comp, &link.var, &link.indices).map_err(wrap)?;
                for (k, v) in r.zip(values) {
                    vecs.f[k] = v - vecs.u[k];
                }
            }
            OutputMode::State { residual } => {
                let values = copy_out(&*comp, residual, &link.indices).map_err(wrap)?;
                for (k, v) in r.zip(values) {
                    vecs.f[k] = -v;
                }
            }
        }
    }
    Ok(())
}

/// Requested units bottom-up (leaf: the component's own request, parallel:
/// sum, serial: max), then `workers` handed out top-down.
pub fn allocate_execution_units(root: &mut System, bindings: &Bindings, workers: usize) {
    compute_requested(root, bindings);
    assign(root, workers.max(1));
}

fn compute_requested(sys: &mut System, bindings: &Bindings) -> usize {
    let req = match &mut sys.kind {
        SystemKind::Leaf(leaf) => bindings
            .comps
            .get(&leaf.comp)
            .filter(|_| leaf.executes())
            .and_then(|h| lock(h).ok().map(|c| c.requested_execution_units()))
            .unwrap_or(1)
            .max(1),
        SystemKind::Serial(c) => c
            .iter_mut()
            .map(|s| compute_requested(s, bindings))
            .max()
            .unwrap_or(1),
        SystemKind::Parallel(c) => c
            .iter_mut()
            .map(|s| compute_requested(s, bindings))
            .sum::<usize>()
            .max(1),
    };
    sys.requested_units = req;
    req
}

fn assign(sys: &mut System, available: usize) {
    sys.assigned_units = available.min(sys.requested_units).max(1);
    let units = sys.assigned_units;
    match &mut sys.kind {
        SystemKind::Leaf(_) => {}
        SystemKind::Serial(c) => c.iter_mut().for_each(|s| assign(s, units)),
        SystemKind::Parallel(c) => {
            let total: usize = c.iter().map(|s| s.requested_units).sum();
            let mut shares: Vec<usize> = c
                .iter()
                .map(|s| (units * s.requested_units / total.max(1)).max(1))
                .collect();
            // Hand leftovers to the largest requesters first.
            let mut left = units.saturating_sub(shares.iter().sum());
            let mut order: Vec<usize> = (0..c.len()).collect();
            order.sort_by_key(|&i| std::cmp::Reverse(c[i].requested_units));
            while left > 0 {
                let mut gave = false;
                for &i in &order {
                    if left > 0 && shares[i] < c[i].requested_units {
                        shares[i] += 1;
                        left -= 1;
                        gave = true;
                    }
                }
                if !gave {
                    break;
                }
            }
            for (s, share) in c.iter_mut().zip(shares) {
                assign(s, share);
            }
        }
    }
}
