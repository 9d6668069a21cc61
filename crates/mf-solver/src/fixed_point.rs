//! Gauss-Seidel style fixed-point iteration.

use mf_core::NormKind;
use mf_system::{ExecutionPlan, RunContext};
use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{
    Constraint, Driver, HasEqConstraints, HasParameters, Parameter, SolveReport, WorkflowInfo,
    add_eq_constraint, add_unique_parameter, check_pairs,
};
use crate::error::{SolverError, SolverResult};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FixedPointConfig {
    pub max_iteration: usize,
    pub tolerance: f64,
    pub norm: NormKind,
}

impl Default for FixedPointConfig {
    fn default() -> Self {
        Self {
            max_iteration: 25,
            tolerance: 1e-3,
            norm: NormKind::Infinity,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FixedPointIterator {
    pub config: FixedPointConfig,
    workflow: Option<Vec<String>>,
    params: Vec<Parameter>,
    constraints: Vec<Constraint>,
    current_iteration: usize,
    normval: f64,
}

impl FixedPointIterator {
    pub fn new(config: FixedPointConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_workflow(mut self, comps: &[&str]) -> Self {
        self.workflow = Some(comps.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    pub fn normval(&self) -> f64 {
        self.normval
    }

    fn start_iteration(&mut self) {
        self.current_iteration = 0;
        self.normval = f64::INFINITY;
    }

    fn continue_iteration(&self, ctx: &RunContext<'_>) -> bool {
        !ctx.stop_requested()
            && self.current_iteration < self.config.max_iteration
            && self.normval > self.config.tolerance
    }
}

impl HasParameters for FixedPointIterator {
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

impl HasEqConstraints for FixedPointIterator {
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

impl Driver for FixedPointIterator {
    fn kind(&self) -> &'static str {
        "fixed_point"
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
        check_pairs("fixed point iterator", self.params.len(), self.constraints.len(), info)?;
        let no_vars = |_: &str| None::<f64>;
        for c in &self.constraints {
            for side in [&c.lhs, &c.rhs] {
                if side.referenced_varpaths().is_empty() && side.evaluate(&no_vars).is_ok_and(|v| v == 0.0) {
                    return Err(SolverError::config(format!(
                        "constraint '{}' has a zero side; write it as an equality between two variables",
                        c.text()
                    )));
                }
            }
            if c.referenced_varpaths().len() > 2 {
                return Err(SolverError::config(format!(
                    "constraint '{}' references more than two variables",
                    c.text()
                )));
            }
        }
        Ok(())
    }

    fn execute(&mut self, plan: &mut ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<SolveReport> {
        self.start_iteration();
        let unknowns = plan.unknown_entries();
        let mut history = Vec::new();
        while self.continue_iteration(ctx) {
            plan.run(ctx)?;
            self.normval = plan.residual_norm(self.config.norm);
            history.push(self.normval);
            if self.normval > self.config.tolerance {
                let vecs = plan.vecs_mut();
                for &i in &unknowns {
                    let step = vecs.f[i];
                    vecs.u[i] += step;
                }
            }
            self.current_iteration += 1;
            debug!(iteration = self.current_iteration, normval = self.normval, "fixed point");
        }
        let converged = self.normval <= self.config.tolerance;
        info!(
            iterations = self.current_iteration,
            normval = self.normval,
            converged,
            "fixed point finished"
        );
        Ok(SolveReport {
            converged,
            iterations: self.current_iteration,
            residual_norm: self.normval,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = FixedPointConfig::default();
        assert_eq!(c.max_iteration, 25);
        assert_eq!(c.tolerance, 1e-3);
        assert_eq!(c.norm, NormKind::Infinity);
    }

    #[test]
    fn check_config_rejects_degenerate_constraints() {
        let cyclic = WorkflowInfo {
            has_cycle: true,
            ..Default::default()
        };
        let mut fp = FixedPointIterator::default();
        fp.add_parameter(Parameter::new("a.x")).unwrap();
        fp.add_constraint("a.x = 0").unwrap();
        assert!(matches!(fp.check_config(&cyclic), Err(SolverError::Configuration { .. })));

        fp.clear_constraints();
        fp.add_constraint("a.x = b.y + c.z").unwrap();
        assert!(fp.check_config(&cyclic).is_err());

        fp.clear_constraints();
        fp.add_constraint("a.x = b.y").unwrap();
        assert!(fp.check_config(&WorkflowInfo::default()).is_ok());
    }
}
