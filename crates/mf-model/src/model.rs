//! The user-facing assembly: components, connections, a driver, and the
//! build pipeline that turns them into an execution plan.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use mf_components::fd::FD_STEP;
use mf_components::{
    BoundaryStore, Component, ComponentError, ComponentHandle, PseudoComponent,
    finite_difference_jacobian, handle, lock,
};
use mf_core::{Io, VarMeta};
use mf_expr::Expression;
use mf_graph::{ExprMapper, GraphError, ReduceRequest, VariableGraph, reduce_graph};
use mf_solver::{
    Driver, GradientCheck, GradientMode, GradientOutput, LinearSolver, RunOnce, SolveReport,
    SUSPECT_LIMIT, WorkflowInfo, param_constraints,
};
use mf_system::{AssemblyOptions, Bindings, ExecutionPlan, RunContext, build_plan};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::error::{ModelError, ModelResult};
use crate::options::ModelOptions;

const DRIVER_NODE: &str = "_driver";

pub struct Model {
    graph: VariableGraph,
    mapper: ExprMapper,
    comps: BTreeMap<String, ComponentHandle>,
    boundary: Arc<Mutex<BoundaryStore>>,
    driver: Box<dyn Driver>,
    options: ModelOptions,
    pool: Option<rayon::ThreadPool>,
    stop: Arc<AtomicBool>,
    plan: Option<ExecutionPlan>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("comps", &self.comps.keys().collect::<Vec<_>>())
            .field("driver", &self.driver.kind())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn new(options: ModelOptions) -> ModelResult<Self> {
        let pool = if options.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .build()
                .map_err(|e| ModelError::config(format!("cannot start {} workers: {e}", options.workers)))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            graph: VariableGraph::new(),
            mapper: ExprMapper::new(),
            comps: BTreeMap::new(),
            boundary: Arc::new(Mutex::new(BoundaryStore::new())),
            driver: Box::new(RunOnce::new()),
            options,
            pool,
            stop: Arc::new(AtomicBool::new(false)),
            plan: None,
        })
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn graph(&self) -> &VariableGraph {
        &self.graph
    }

    /// The plan built by the last `setup` or `run`, if still valid.
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    fn invalidate(&mut self) {
        self.plan = None;
    }

    fn bindings(&self) -> Bindings {
        let boundary: ComponentHandle = self.boundary.clone();
        Bindings::new(self.comps.clone(), boundary)
    }

    fn lock_boundary(&self) -> ModelResult<MutexGuard<'_, BoundaryStore>> {
        self.boundary
            .lock()
            .map_err(|_| ModelError::Component(ComponentError::Poisoned))
    }

    fn is_pseudo(&self, name: &str) -> bool {
        self.graph.node_by_name(name).is_some_and(|n| n.is_pseudo())
    }

    // ---- building the model ---------------------------------------------------

    pub fn add_component<C: Component + 'static>(&mut self, name: &str, comp: C) -> ModelResult<()> {
        self.graph.add_component(name, comp.variables(), false)?;
        self.comps.insert(name.to_string(), handle(comp));
        debug!(component = name, "added component");
        self.invalidate();
        Ok(())
    }

    /// Declare an interface variable of the model with its initial value.
    pub fn add_boundary_var(&mut self, meta: VarMeta, value: &[f64]) -> ModelResult<()> {
        let name = meta.name.clone();
        self.graph.add_boundary_var(meta.clone())?;
        {
            let mut store = self.lock_boundary()?;
            store.declare(meta)?;
            if !value.is_empty() {
                store.set(&name, value)?;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Connect a source expression to a destination variable path.
    pub fn connect(&mut self, src: &str, dest: &str) -> ModelResult<()> {
        if let Some(spec) = self.mapper.connect(&mut self.graph, src, dest)? {
            debug!(pseudo = spec.name.as_str(), src, dest, "connection needs a pseudo-component");
            self.comps
                .insert(spec.name.clone(), handle(PseudoComponent::new(&spec)));
        }
        self.invalidate();
        Ok(())
    }

    pub fn disconnect(&mut self, path: &str, path2: Option<&str>) -> ModelResult<()> {
        for pseudo in self.mapper.disconnect(&mut self.graph, path, path2)? {
            self.comps.remove(&pseudo);
        }
        self.invalidate();
        Ok(())
    }

    /// Remove a component (or boundary variable) and its connections.
    pub fn remove(&mut self, name: &str) -> ModelResult<()> {
        for pseudo in self.mapper.remove(&mut self.graph, name)? {
            self.comps.remove(&pseudo);
        }
        self.comps.remove(name);
        self.invalidate();
        Ok(())
    }

    /// User connections; with `show_pseudo` the expanded graph-level ones.
    pub fn list_connections(&self, show_pseudo: bool) -> Vec<(String, String)> {
        self.mapper.list_connections(&self.graph, show_pseudo)
    }

    pub fn set_driver<D: Driver + 'static>(&mut self, driver: D) {
        self.driver = Box::new(driver);
        self.invalidate();
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    // ---- values ------------------------------------------------------------------

    fn resolve(&self, path: &str) -> ModelResult<(ComponentHandle, String, Option<Vec<usize>>)> {
        if self.graph.var_meta(path).is_none() {
            return Err(GraphError::UnresolvedPath {
                path: path.to_string(),
            }
            .into());
        }
        let base = self.graph.base_var(path);
        let indices = self.graph.path_indices(path)?;
        match base.split_once('.') {
            Some((comp, var)) if self.comps.contains_key(comp) => {
                let h = self.comps[comp].clone();
                Ok((h, var.to_string(), indices))
            }
            _ => {
                let h: ComponentHandle = self.boundary.clone();
                Ok((h, base, indices))
            }
        }
    }

    /// Set a variable, or a slice of one, by path.
    pub fn set(&mut self, path: &str, values: &[f64]) -> ModelResult<()> {
        let (h, var, indices) = self.resolve(path)?;
        let mut comp = lock(&h)?;
        match indices {
            None => comp.set(&var, values)?,
            Some(idx) => {
                if idx.len() != values.len() {
                    return Err(ComponentError::SizeMismatch {
                        name: path.to_string(),
                        expected: idx.len(),
                        got: values.len(),
                    }
                    .into());
                }
                let mut full = comp.get(&var)?.to_vec();
                for (&i, &v) in idx.iter().zip(values) {
                    full[i] = v;
                }
                comp.set(&var, &full)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> ModelResult<Vec<f64>> {
        let (h, var, indices) = self.resolve(path)?;
        let comp = lock(&h)?;
        let full = comp.get(&var)?;
        Ok(match indices {
            None => full.to_vec(),
            Some(idx) => idx.iter().map(|&i| full[i]).collect(),
        })
    }

    pub fn get_scalar(&self, path: &str) -> ModelResult<f64> {
        self.get(path)?
            .first()
            .copied()
            .ok_or_else(|| ModelError::config(format!("'{path}' is empty")))
    }

    // ---- run control -------------------------------------------------------------

    /// Shared flag; setting it stops the current run between component
    /// executions.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn param_targets(&self) -> Vec<String> {
        self.driver
            .as_parameters()
            .map(|p| p.parameters().iter().map(|p| p.target.clone()).collect())
            .unwrap_or_default()
    }

    /// Variables read by the driver's constraints, objectives and stop
    /// conditions.
    fn responses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |paths: Vec<String>| {
            for p in paths {
                if !out.contains(&p) {
                    out.push(p);
                }
            }
        };
        if let Some(c) = self.driver.as_eq_constraints() {
            for con in c.eq_constraints() {
                push(con.referenced_varpaths());
            }
        }
        if let Some(o) = self.driver.as_objectives() {
            for obj in o.objectives() {
                push(obj.expr.referenced_varpaths());
            }
        }
        if let Some(s) = self.driver.as_stop_conditions() {
            for con in s.stop_conditions() {
                push(con.referenced_varpaths());
            }
        }
        out
    }

    fn user_components(&self) -> Vec<String> {
        self.comps
            .keys()
            .filter(|c| !self.is_pseudo(c))
            .cloned()
            .collect()
    }

    fn is_connected(&self, path: &str) -> bool {
        let sub = format!("{path}[");
        self.graph
            .connections_to(path)
            .iter()
            .any(|(_, d)| d == path || d.starts_with(&sub))
    }

    /// Validate the model before any numeric work. Returns the warnings
    /// that strict mode would have turned into errors.
    pub fn check_config(&self) -> ModelResult<Vec<String>> {
        let mut warnings = Vec::new();
        let params = self.param_targets();

        for target in &params {
            let Some(meta) = self.graph.var_meta(target) else {
                return Err(GraphError::UnresolvedPath {
                    path: target.clone(),
                }
                .into());
            };
            if let Some(p) = self
                .driver
                .as_parameters()
                .and_then(|h| h.parameters().iter().find(|p| &p.target == target))
            {
                p.resolved_bounds(meta)?;
            }
            if let Err(e) = self.graph.check_dest_free(target) {
                return Err(GraphError::Conflict {
                    what: format!("parameter '{target}' collides with a connection: {e}"),
                }
                .into());
            }
        }

        for (name, h) in &self.comps {
            let comp = lock(h)?;
            for v in comp.variables().iter().filter(|v| v.required && v.io == Io::In) {
                let path = format!("{name}.{}", v.name);
                if !self.is_connected(&path) && !params.contains(&path) {
                    return Err(ModelError::config(format!(
                        "required variable '{path}' is not connected"
                    )));
                }
            }
        }

        let user = self.user_components();
        let members: BTreeSet<String> = match self.driver.workflow() {
            Some(wf) => {
                if let Some(unknown) = wf.iter().find(|c| !self.comps.contains_key(*c)) {
                    return Err(ModelError::config(format!(
                        "workflow names unknown component '{unknown}'"
                    )));
                }
                wf.iter().cloned().collect()
            }
            None => user.iter().cloned().collect(),
        };
        let cg = self.graph.component_graph();
        let has_cycle = cg
            .subgraph(&members)
            .strongly_connected_components()
            .iter()
            .any(|scc| scc.len() > 1);
        let mut has_states = false;
        for m in &members {
            if let Some(h) = self.comps.get(m) {
                has_states |= !lock(h)?.list_states().is_empty();
            }
        }
        self.driver.check_config(&WorkflowInfo {
            has_cycle,
            has_states,
        })?;

        for c in user.iter().filter(|c| !members.contains(*c)) {
            let feeds = members.iter().any(|m| cg.ancestors(m).contains(c));
            let msg = if feeds {
                format!("component '{c}' is outside the workflow but feeds it; it runs once before the driver")
            } else {
                format!("component '{c}' is not in the workflow and will not execute")
            };
            if self.options.strict {
                return Err(ModelError::config(msg));
            }
            warn!("{msg}");
            warnings.push(msg);
        }
        Ok(warnings)
    }

    /// Build the variable graph, reduce it to what the driver (and the
    /// given gradient inputs/outputs) needs, and run the remaining stages.
    fn build(&self, inputs: &[String], outputs: &[String]) -> ModelResult<ExecutionPlan> {
        let params = self.param_targets();
        let responses = self.responses();

        let mut graph = self.graph.clone();
        if !params.is_empty() || !responses.is_empty() {
            graph.add_driver(DRIVER_NODE, &params, &responses)?;
        }

        let mut keep: BTreeSet<String> = params
            .iter()
            .chain(&responses)
            .chain(inputs)
            .chain(outputs)
            .cloned()
            .collect();
        keep.extend(graph.get_boundary_inputs());
        keep.extend(graph.get_boundary_outputs());
        for (name, h) in &self.comps {
            let comp = lock(h)?;
            keep.extend(comp.list_states().into_iter().map(|s| format!("{name}.{s}")));
        }

        let req = ReduceRequest {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            keep,
        };
        let rg = reduce_graph(&graph, &req)?;
        let opts = AssemblyOptions {
            parallel: self.options.parallel,
            workflow: self.driver.workflow().map(<[String]>::to_vec),
            params,
        };
        let constraints = param_constraints(self.driver.as_ref());
        let plan = build_plan(&rg, &self.bindings(), &opts, &constraints, self.options.workers)?;
        info!(tree = plan.root().describe().as_str(), "model setup complete");
        Ok(plan)
    }

    /// Check the configuration and build the execution plan for `run`.
    pub fn setup(&mut self) -> ModelResult<()> {
        self.check_config()?;
        self.plan = Some(self.build(&[], &[])?);
        Ok(())
    }

    /// Run the driver over the workflow.
    pub fn run(&mut self) -> ModelResult<SolveReport> {
        self.stop.store(false, Ordering::SeqCst);
        if self.plan.is_none() {
            self.setup()?;
        }
        let bindings = self.bindings();
        let plan = self
            .plan
            .as_mut()
            .ok_or_else(|| ModelError::config("model has no execution plan"))?;
        plan.load(&bindings)?;

        let mut ctx = RunContext::new(&self.stop);
        if let Some(pool) = &self.pool {
            ctx = ctx.with_pool(pool);
        }
        plan.run_prepass(&ctx)?;
        let report = self.driver.execute(plan, &ctx)?;
        Ok(report.into_result(self.options.strict, self.driver.kind())?)
    }

    /// Total derivatives of `outputs` (variable paths or expressions) with
    /// respect to `inputs` at the current point.
    pub fn calc_gradient(&mut self, inputs: &[&str], outputs: &[&str], mode: GradientMode) -> ModelResult<DMatrix<f64>> {
        let inputs: Vec<String> = inputs.iter().map(|s| s.trim().to_string()).collect();
        let mut outs = Vec::with_capacity(outputs.len());
        let mut out_vars: Vec<String> = Vec::new();
        for text in outputs {
            let expr = Expression::parse(text)?;
            for p in expr.referenced_varpaths() {
                if !out_vars.contains(&p) {
                    out_vars.push(p);
                }
            }
            outs.push(match expr.as_var() {
                Some(v) => GradientOutput::Var(v.to_string()),
                None => GradientOutput::Expr(expr),
            });
        }

        let mut plan = self.build(&inputs, &out_vars)?;
        plan.load(&self.bindings())?;
        self.stop.store(false, Ordering::SeqCst);
        let mut ctx = RunContext::new(&self.stop);
        if let Some(pool) = &self.pool {
            ctx = ctx.with_pool(pool);
        }
        plan.run_prepass(&ctx)?;
        plan.run(&ctx)?;

        let solver = LinearSolver::new(self.options.linear);
        Ok(solver.calc_gradient(&plan, &inputs, &outs, mode)?)
    }

    /// Compare [`Model::calc_gradient`] against forward differences taken by
    /// rerunning the whole model. Inputs are put back and the model rerun
    /// before returning.
    pub fn check_gradient(&mut self, inputs: &[&str], outputs: &[&str], mode: GradientMode) -> ModelResult<GradientCheck> {
        let calculated = self.calc_gradient(inputs, outputs, mode)?;

        let inputs: Vec<&str> = inputs.iter().map(|s| s.trim()).collect();
        let mut sizes = Vec::with_capacity(inputs.len());
        let mut start = Vec::new();
        let mut columns = Vec::new();
        for name in &inputs {
            let v = self.get(name)?;
            columns.extend(entry_labels(name, v.len()));
            sizes.push(v.len());
            start.extend(v);
        }
        let exprs = outputs
            .iter()
            .map(|t| Expression::parse(t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::new();
        for e in &exprs {
            match e.as_var() {
                Some(v) => rows.extend(entry_labels(e.text(), self.get(v)?.len())),
                None => rows.push(e.text().to_string()),
            }
        }

        let x0 = DVector::from_vec(start);
        let finite_diff = finite_difference_jacobian(
            &x0,
            |x: &DVector<f64>| -> ModelResult<DVector<f64>> {
                self.set_flat(&inputs, &sizes, x.as_slice())?;
                self.run()?;
                self.output_values(&exprs)
            },
            FD_STEP,
        );
        self.set_flat(&inputs, &sizes, x0.as_slice())?;
        self.run()?;

        let check = GradientCheck::compare(&rows, &columns, calculated, finite_diff?)?;
        for e in check.suspects() {
            warn!(
                output = %e.output,
                input = %e.input,
                calculated = e.calculated,
                finite_diff = e.finite_diff,
                limit = SUSPECT_LIMIT,
                "suspect derivative"
            );
        }
        info!(
            entries = check.entries.len(),
            max_error = check.max_error(),
            mean_error = check.mean_error(),
            "gradient check"
        );
        Ok(check)
    }

    fn set_flat(&mut self, inputs: &[&str], sizes: &[usize], x: &[f64]) -> ModelResult<()> {
        let mut at = 0;
        for (name, &n) in inputs.iter().zip(sizes) {
            self.set(name, &x[at..at + n])?;
            at += n;
        }
        Ok(())
    }

    fn output_values(&self, exprs: &[Expression]) -> ModelResult<DVector<f64>> {
        let mut out = Vec::new();
        for e in exprs {
            match e.as_var() {
                Some(v) => out.extend(self.get(v)?),
                None => {
                    let scope = |p: &str| self.get_scalar(p).ok();
                    out.push(e.evaluate(&scope)?);
                }
            }
        }
        Ok(DVector::from_vec(out))
    }
}

/// `name` for a scalar, `name[i]` per entry otherwise.
fn entry_labels(name: &str, size: usize) -> Vec<String> {
    if size == 1 {
        vec![name.to_string()]
    } else {
        (0..size).map(|i| format!("{name}[{i}]")).collect()
    }
}
