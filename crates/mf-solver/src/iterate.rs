//! Repeat the workflow until a stop condition holds.

use mf_core::NormKind;
use mf_system::{ExecutionPlan, RunContext};
use serde::Deserialize;
use tracing::{debug, info};

use crate::driver::{Constraint, Driver, HasStopConditions, SolveReport};
use crate::error::SolverResult;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct IterateConfig {
    pub max_iterations: usize,
    /// Ignore the stop conditions before the first pass.
    pub run_at_least_once: bool,
}

impl Default for IterateConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            run_at_least_once: true,
        }
    }
}

/// Runs the workflow repeatedly, carrying severed feedback values into the
/// next pass, until a stop condition holds or the iteration limit is hit.
#[derive(Debug, Clone, Default)]
pub struct IterateUntil {
    pub config: IterateConfig,
    workflow: Option<Vec<String>>,
    conditions: Vec<Constraint>,
    iteration: usize,
}

impl IterateUntil {
    pub fn new(config: IterateConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_workflow(mut self, comps: &[&str]) -> Self {
        self.workflow = Some(comps.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn start_iteration(&mut self) {
        self.iteration = 0;
    }

    fn continue_iteration(&mut self, plan: &ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<bool> {
        if ctx.stop_requested() {
            return Ok(false);
        }
        if self.iteration < 1 && self.config.run_at_least_once {
            self.iteration += 1;
            return Ok(true);
        }
        if self.should_stop(plan)? {
            return Ok(false);
        }
        if self.iteration < self.config.max_iterations {
            self.iteration += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

impl HasStopConditions for IterateUntil {
    fn stop_conditions(&self) -> &[Constraint] {
        &self.conditions
    }

    fn add_stop_condition(&mut self, text: &str) -> SolverResult<()> {
        self.conditions.push(Constraint::parse(text)?);
        Ok(())
    }

    fn clear_stop_conditions(&mut self) {
        self.conditions.clear();
    }
}

impl Driver for IterateUntil {
    fn kind(&self) -> &'static str {
        "iterate_until"
    }

    fn workflow(&self) -> Option<&[String]> {
        self.workflow.as_deref()
    }

    fn as_stop_conditions(&self) -> Option<&dyn HasStopConditions> {
        Some(self)
    }

    fn execute(&mut self, plan: &mut ExecutionPlan, ctx: &RunContext<'_>) -> SolverResult<SolveReport> {
        self.start_iteration();
        let feedback = plan.feedback_entries();
        let mut history = Vec::new();
        while self.continue_iteration(plan, ctx)? {
            plan.run(ctx)?;
            history.push(plan.residual_norm(NormKind::Infinity));
            let vecs = plan.vecs_mut();
            for &i in &feedback {
                let step = vecs.f[i];
                vecs.u[i] += step;
            }
            debug!(iteration = self.iteration, "iterate until");
        }
        let stopped = self.should_stop(plan)?;
        let converged = stopped || self.conditions.is_empty();
        info!(iterations = self.iteration, stopped, "iterate until finished");
        Ok(SolveReport {
            converged,
            iterations: self.iteration,
            residual_norm: history.last().copied().unwrap_or(0.0),
            history,
        })
    }
}
