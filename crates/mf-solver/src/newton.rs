//! Newton solver over an execution plan.

use std::collections::BTreeSet;

use mf_components::LinearMode;
use mf_core::NormKind;
use mf_system::{ExecutionPlan, RunContext};
use nalgebra::DVector;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::driver::{
    Constraint, Driver, HasEqConstraints, HasParameters, Parameter, SolveReport, WorkflowInfo,
    add_eq_constraint, add_unique_parameter, check_pairs,
};
use crate::error::SolverResult;
use crate::linear::{LinearSolver, LinearSolverConfig};

/// Newton solver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance for residual norm
    pub atol: f64,
    /// Relative tolerance for residual norm
    pub rtol: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
    pub linear: LinearSolverConfig,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            atol: 1e-10,
            rtol: 1e-10,
            line_search_beta: 0.5,
            max_line_search_iters: 20,
            linear: LinearSolverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    pub config: NewtonConfig,
    workflow: Option<Vec<String>>,
    params: Vec<Parameter>,
    constraints: Vec<Constraint>,
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_workflow(mut self, comps: &[&str]) -> Self {
        self.workflow = Some(comps.iter().map(|c| c.to_string()).collect());
        self
    }

    fn converged(&self, r: f64, r0: f64) -> bool {
        r < self.config.atol || r < self.config.rtol * r0
    }
}

/// Run the plan at `base + alpha * step` and return the residual norm.
fn trial(
    plan: &mut ExecutionPlan,
    base: &DVector<f64>,
    step: &DVector<f64>,
    alpha: f64,
    ctx: &RunContext<'_>,
) -> SolverResult<f64> {
    plan.vecs_mut().u = base + alpha * step;
    plan.run(ctx)?;
    Ok(plan.residual_norm(NormKind::Euclidean))
}

impl HasParameters for NewtonSolver {
    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn add_parameter(&mut self, param: Parameter) -> SolverResult<()> {
        add_unique_parameter(&mut self.params, param)
    }

    fn clear_parameters(&mut self) {
        self.params.clear();
    }
}

impl HasEqConstraints for NewtonSolver {
    fn eq_constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn add_constraint(&mut self, text: &str) -> SolverResult<()> {
        add_eq_constraint(&mut self.constraints, text)
    }

    fn clear_constraints(&mut self) {
        self.constraints.clear();
    }
}

impl Driver for NewtonSolver {
    fn kind(&self) -> &'static str {
        "newton"
    }

    fn workflow(&self) -> Option<&[String]> {
        self.workflow.as_deref()
    }

    fn as_parameters(&self) -> Option<&dyn HasParameters> {
        Some(self)
    }

    fn as_eq_constraints(&self) -> Option<&dyn HasEqConstraints> {
        Some(self)
    }

    fn check_config(&self, info: &WorkflowInfo) -> SolverResult<()> {
        check_pairs("newton solver", self.params.len(), self.constraints.len(), info)
    }

    fn execute(&mut self, plan: &mut ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<SolveReport> {
        let linear = LinearSolver::new(self.config.linear);
        let fixed = BTreeSet::new();

        plan.run(ctx)?;
        let mut r = plan.residual_norm(NormKind::Euclidean);
        let r0 = r;
        let mut history = vec![r];
        let mut iterations = 0;

        while iterations < self.config.max_iterations && !self.converged(r, r0) {
            let op = plan.linearize(&fixed)?;
            let rhs = plan.vecs().f.clone();
            let step = linear.solve(&op, LinearMode::Forward, &rhs);
            if !step.converged {
                warn!(iteration = iterations, "linear solve for the Newton step did not converge");
            }

            let base = plan.vecs().u.clone();
            let mut alpha = 1.0;
            let mut r_new = trial(plan, &base, &step.x, alpha, ctx)?;
            for _ in 0..self.config.max_line_search_iters {
                if r_new < r {
                    break;
                }
                alpha *= self.config.line_search_beta;
                r_new = trial(plan, &base, &step.x, alpha, ctx)?;
            }

            r = r_new;
            iterations += 1;
            history.push(r);
            debug!(iteration = iterations, residual = r, alpha, "newton");

            if alpha < 1e-10 {
                warn!(iteration = iterations, "newton line search stagnated");
                break;
            }
        }

        let converged = self.converged(r, r0);
        info!(iterations, residual = r, converged, "newton finished");
        Ok(SolveReport {
            converged,
            iterations,
            residual_norm: r,
            history,
        })
    }
}
