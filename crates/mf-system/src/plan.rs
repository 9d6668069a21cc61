//! The assembled, allocated and wired execution plan.

use std::collections::BTreeSet;

use mf_components::{fd::linearize, lock};
use mf_core::{NormKind, norm};
use mf_expr::{Expression, Scope};
use mf_graph::ReducedGraph;
use tracing::{debug, info};

use crate::assemble::{Assembly, AssemblyOptions, SeveredEdge, assemble_systems};
use crate::bindings::Bindings;
use crate::error::{SystemError, SystemResult};
use crate::layout::{SlotKind, VarLayout, VecSet, allocate_vectors};
use crate::linear::LinearOperator;
use crate::scatter::allocate_scatter_plans;
use crate::system::{OutputMode, RunContext, System, allocate_execution_units};

/// A driver parameter and the equality constraint that closes it.
///
/// The residual stored for the parameter's slot is `other - param_side`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamConstraint {
    pub target: String,
    pub param_side: Expression,
    pub other: Expression,
}

#[derive(Debug, Clone)]
struct ParamRow {
    slot: usize,
    param_side: Expression,
    other: Expression,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    root: System,
    prepass: Option<System>,
    layout: VarLayout,
    vecs: VecSet,
    params: Vec<ParamRow>,
    severed: Vec<SeveredEdge>,
}

/// Run every stage after reduction: assemble, size execution units,
/// allocate vectors, wire scatter plans.
pub fn build_plan(
    rg: &ReducedGraph,
    bindings: &Bindings,
    opts: &AssemblyOptions,
    constraints: &[ParamConstraint],
    workers: usize,
) -> SystemResult<ExecutionPlan> {
    let mut assembly = assemble_systems(rg, opts)?;
    allocate_execution_units(&mut assembly.root, bindings, workers);
    if let Some(pre) = assembly.prepass.as_mut() {
        allocate_execution_units(pre, bindings, workers);
    }
    let (layout, vecs) = allocate_vectors(rg, &assembly)?;
    allocate_scatter_plans(&mut assembly.root, rg, &layout, bindings)?;
    if let Some(pre) = assembly.prepass.as_mut() {
        allocate_scatter_plans(pre, rg, &layout, bindings)?;
    }
    ExecutionPlan::new(assembly, layout, vecs, constraints)
}

fn scalar_scope<'a>(layout: &'a VarLayout, vecs: &'a VecSet) -> impl Scope + 'a {
    move |p: &str| {
        layout
            .slot_of(p)
            .filter(|s| s.size == 1)
            .map(|s| vecs.u[s.offset])
    }
}

impl ExecutionPlan {
    pub fn new(assembly: Assembly, layout: VarLayout, vecs: VecSet, constraints: &[ParamConstraint]) -> SystemResult<Self> {
        let mut params = Vec::with_capacity(constraints.len());
        for c in constraints {
            let slot = layout
                .index_of(&c.target)
                .filter(|i| layout.slot(*i).is_some_and(|s| s.kind == SlotKind::Param))
                .ok_or_else(|| {
                    SystemError::config(format!("'{}' is not a parameter slot", c.target))
                })?;
            for r in c
                .param_side
                .referenced_varpaths()
                .into_iter()
                .chain(c.other.referenced_varpaths())
            {
                match layout.slot_of(&r) {
                    Some(s) if s.size == 1 => {}
                    Some(_) => {
                        return Err(SystemError::config(format!(
                            "constraint on '{}' references non-scalar '{r}'",
                            c.target
                        )));
                    }
                    None => {
                        return Err(SystemError::config(format!(
                            "constraint on '{}' references '{r}', which is not part of the solved model",
                            c.target
                        )));
                    }
                }
            }
            params.push(ParamRow {
                slot,
                param_side: c.param_side.clone(),
                other: c.other.clone(),
            });
        }
        info!(
            entries = layout.len(),
            unknowns = layout.slots().iter().filter(|s| s.kind.is_unknown()).count(),
            "execution plan ready"
        );
        Ok(Self {
            root: assembly.root,
            prepass: assembly.prepass,
            layout,
            vecs,
            params,
            severed: assembly.severed,
        })
    }

    pub fn root(&self) -> &System {
        &self.root
    }

    pub fn prepass(&self) -> Option<&System> {
        self.prepass.as_ref()
    }

    pub fn layout(&self) -> &VarLayout {
        &self.layout
    }

    pub fn vecs(&self) -> &VecSet {
        &self.vecs
    }

    pub fn vecs_mut(&mut self) -> &mut VecSet {
        &mut self.vecs
    }

    pub fn severed(&self) -> &[SeveredEdge] {
        &self.severed
    }

    /// Refresh every slot from the components that own it.
    pub fn load(&mut self, bindings: &Bindings) -> SystemResult<()> {
        self.layout.load(&mut self.vecs, bindings)
    }

    /// Run the components outside the workflow that feed it.
    pub fn run_prepass(&mut self, ctx: &RunContext<'_>) -> SystemResult<()> {
        if let Some(pre) = self.prepass.as_mut() {
            debug!("running prepass");
            pre.run(&mut self.vecs, ctx)?;
        }
        Ok(())
    }

    /// One pass over the tree, then parameter residuals.
    pub fn run(&mut self, ctx: &RunContext<'_>) -> SystemResult<()> {
        self.root.run(&mut self.vecs, ctx)?;
        self.eval_params()
    }

    fn eval_params(&mut self) -> SystemResult<()> {
        let mut values = Vec::with_capacity(self.params.len());
        {
            let scope = scalar_scope(&self.layout, &self.vecs);
            for p in &self.params {
                values.push(p.other.evaluate(&scope)? - p.param_side.evaluate(&scope)?);
            }
        }
        for (p, v) in self.params.iter().zip(values) {
            if let Some(s) = self.layout.slot(p.slot) {
                self.vecs.f[s.offset] = v;
            }
        }
        Ok(())
    }

    pub fn residual_norm(&self, kind: NormKind) -> f64 {
        norm(self.vecs.f.as_slice(), kind)
    }

    /// Current value of a named variable.
    pub fn value(&self, name: &str) -> Option<&[f64]> {
        self.layout
            .slot_of(name)
            .map(|s| &self.vecs.u.as_slice()[s.range()])
    }

    /// Evaluate an expression over the current `u`.
    pub fn evaluate(&self, expr: &Expression) -> SystemResult<f64> {
        Ok(expr.evaluate(&scalar_scope(&self.layout, &self.vecs))?)
    }

    /// Gradient of an expression with respect to vector entries.
    pub fn expression_gradient(&self, expr: &Expression) -> SystemResult<Vec<(usize, f64)>> {
        let (wrt, dual) = expr.gradient(&scalar_scope(&self.layout, &self.vecs))?;
        let mut out = Vec::with_capacity(wrt.len());
        for (name, g) in wrt.iter().zip(dual.grad) {
            let slot = self.layout.slot_of(name).ok_or_else(|| {
                SystemError::config(format!("'{name}' is not part of the solved model"))
            })?;
            out.push((slot.offset, g));
        }
        Ok(out)
    }

    /// Entries of severed feedback slots.
    pub fn feedback_entries(&self) -> Vec<usize> {
        self.layout
            .slots()
            .iter()
            .filter(|s| s.kind == SlotKind::Feedback)
            .flat_map(|s| s.range())
            .collect()
    }

    /// Entries a nonlinear solver iterates on.
    pub fn unknown_entries(&self) -> Vec<usize> {
        self.layout
            .slots()
            .iter()
            .filter(|s| s.kind.is_unknown())
            .flat_map(|s| s.range())
            .collect()
    }

    /// Operator `A = ∂r/∂u` of the residual `r = -f` at the current point.
    ///
    /// Slots listed in `fixed` (and non-differentiable ones) get identity
    /// rows, so they act as independent inputs.
    pub fn linearize(&self, fixed: &BTreeSet<usize>) -> SystemResult<LinearOperator> {
        let slots = self.layout.slots();
        let noflat = |slot: usize| slots.get(slot).is_some_and(|s| s.noflat);
        let mut op = LinearOperator::new(self.layout.len());
        let mut covered = vec![false; slots.len()];

        let leaves = self
            .prepass
            .iter()
            .flat_map(|p| p.leaves())
            .chain(self.root.leaves());
        for leaf in leaves {
            if !leaf.executes() {
                continue;
            }
            let Some(handle) = &leaf.handle else { continue };
            let rows: Vec<_> = leaf
                .plan
                .outputs
                .iter()
                .filter(|o| !fixed.contains(&o.slot) && !noflat(o.slot))
                .collect();
            if rows.is_empty() {
                continue;
            }
            let mut comp = lock(handle).map_err(|e| SystemError::execution(&leaf.comp, e))?;
            let jac = linearize(&mut *comp).map_err(|e| SystemError::execution(&leaf.comp, e))?;
            let (row_off, col_off) = jac.offsets(|v| comp.get(v).map_or(0, <[f64]>::len));

            // Columns: inputs, then states read back as inputs.
            let cols: Vec<(usize, usize, usize, &str, &Option<Vec<usize>>)> = leaf
                .plan
                .inputs
                .iter()
                .map(|l| (l.slot, l.offset, l.size, l.var.as_str(), &l.indices))
                .chain(
                    leaf.plan
                        .outputs
                        .iter()
                        .filter(|o| matches!(o.mode, OutputMode::State { .. }))
                        .map(|o| (o.slot, o.offset, o.size, o.var.as_str(), &o.indices)),
                )
                .filter(|c| !noflat(c.0))
                .collect();

            for o in rows {
                covered[o.slot] = true;
                let (sign, rvar) = match &o.mode {
                    OutputMode::State { residual } => (1.0, residual.as_str()),
                    _ => (-1.0, o.var.as_str()),
                };
                if sign < 0.0 {
                    for k in 0..o.size {
                        op.add(o.offset + k, o.offset + k, 1.0);
                    }
                }
                let Some(&rbase) = row_off.get(rvar) else { continue };
                for k in 0..o.size {
                    let lr = rbase + o.indices.as_ref().map_or(k, |idx| idx[k]);
                    for &(_, coff, csize, cvar, cidx) in &cols {
                        let Some(&cbase) = col_off.get(cvar) else { continue };
                        for m in 0..csize {
                            let lc = cbase + cidx.as_ref().map_or(m, |idx| idx[m]);
                            let v = *jac.matrix.get((lr, lc)).ok_or_else(|| SystemError::Invariant {
                                what: format!("'{}' Jacobian has no entry ({lr}, {lc})", leaf.comp),
                            })?;
                            if v != 0.0 {
                                op.add(o.offset + k, coff + m, sign * v);
                            }
                        }
                    }
                }
            }
        }

        let scope = scalar_scope(&self.layout, &self.vecs);
        for (i, slot) in slots.iter().enumerate() {
            if covered[i] {
                continue;
            }
            let row = self.params.iter().find(|p| p.slot == i);
            match row {
                Some(p) if !fixed.contains(&i) && !slot.noflat => {
                    for (expr, sign) in [(&p.param_side, 1.0), (&p.other, -1.0)] {
                        let (wrt, dual) = expr.gradient(&scope)?;
                        for (name, g) in wrt.iter().zip(dual.grad) {
                            if let Some(s) = self.layout.slot_of(name) {
                                op.add(slot.offset, s.offset, sign * g);
                            }
                        }
                    }
                }
                _ => {
                    for k in slot.range() {
                        op.add(k, k, 1.0);
                    }
                }
            }
        }
        Ok(op)
    }
}
