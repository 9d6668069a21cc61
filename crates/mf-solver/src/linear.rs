//! Linear solves of the linearized system and total derivatives.

use std::collections::BTreeSet;

use mf_components::LinearMode;
use mf_expr::Expression;
use mf_system::{ExecutionPlan, LinearOperator};
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::{SolverError, SolverResult};
use crate::gmres::{GmresConfig, gmres};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinearSolverConfig {
    /// Systems with at most this many entries are solved densely by LU.
    pub dense_threshold: usize,
    pub gmres: GmresConfig,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            dense_threshold: 64,
            gmres: GmresConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum GradientMode {
    Forward,
    Adjoint,
    #[default]
    Auto,
}

/// A quantity whose derivative is requested.
#[derive(Debug, Clone, PartialEq)]
pub enum GradientOutput {
    Var(String),
    Expr(Expression),
}

impl GradientOutput {
    pub fn label(&self) -> &str {
        match self {
            GradientOutput::Var(v) => v,
            GradientOutput::Expr(e) => e.text(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearSolution {
    pub x: DVector<f64>,
    pub converged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LinearSolver {
    pub config: LinearSolverConfig,
}

impl LinearSolver {
    pub fn new(config: LinearSolverConfig) -> Self {
        Self { config }
    }

    /// Solve `A x = b` (forward) or `Aᵀ x = b` (adjoint).
    pub fn solve(&self, op: &LinearOperator, mode: LinearMode, b: &DVector<f64>) -> LinearSolution {
        if op.dim() <= self.config.dense_threshold {
            let a = match mode {
                LinearMode::Forward => op.to_dense(),
                LinearMode::Adjoint => op.to_dense().transpose(),
            };
            return match a.lu().solve(b) {
                Some(x) if x.iter().all(|v| v.is_finite()) => LinearSolution { x, converged: true },
                _ => LinearSolution {
                    x: DVector::zeros(b.len()),
                    converged: false,
                },
            };
        }
        let res = gmres(|v| op.apply(mode, v), b, &self.config.gmres);
        debug!(
            iterations = res.iterations,
            residual = res.residual_norm,
            "gmres finished"
        );
        LinearSolution {
            x: res.x,
            converged: res.converged,
        }
    }

    /// Total derivatives of `outputs` with respect to `inputs` at the
    /// current point of `plan`. Rows follow the flattened output entries,
    /// columns the flattened input entries.
    pub fn calc_gradient(
        &self,
        plan: &ExecutionPlan,
        inputs: &[String],
        outputs: &[GradientOutput],
        mode: GradientMode,
    ) -> SolverResult<DMatrix<f64>> {
        let layout = plan.layout();
        let n = layout.len();

        let mut fixed = BTreeSet::new();
        let mut cols: Vec<(&str, usize, usize)> = Vec::new();
        for name in inputs {
            let index = layout.index_of(name).ok_or_else(|| {
                SolverError::config(format!("gradient input '{name}' is not part of the solved model"))
            })?;
            fixed.insert(index);
            if let Some(slot) = layout.slot(index) {
                for k in 0..slot.size {
                    cols.push((name.as_str(), k, slot.offset + k));
                }
            }
        }

        // Each output entry is a weight vector over `u`.
        let mut rows: Vec<(&str, usize, Vec<(usize, f64)>)> = Vec::new();
        for out in outputs {
            match out {
                GradientOutput::Var(name) => {
                    let slot = layout.slot_of(name).ok_or_else(|| {
                        SolverError::config(format!("gradient output '{name}' is not part of the solved model"))
                    })?;
                    for k in 0..slot.size {
                        rows.push((name.as_str(), k, vec![(slot.offset + k, 1.0)]));
                    }
                }
                GradientOutput::Expr(e) => {
                    rows.push((e.text(), 0, plan.expression_gradient(e)?));
                }
            }
        }

        let mode = match mode {
            GradientMode::Auto if cols.len() <= rows.len() => GradientMode::Forward,
            GradientMode::Auto => GradientMode::Adjoint,
            m => m,
        };
        let op = plan.linearize(&fixed)?;
        let mut jac = DMatrix::zeros(rows.len(), cols.len());

        match mode {
            GradientMode::Adjoint => {
                for (i, (name, k, weights)) in rows.iter().enumerate() {
                    let mut rhs = DVector::zeros(n);
                    for &(at, w) in weights {
                        rhs[at] += w;
                    }
                    let sol = self.solve(&op, LinearMode::Adjoint, &rhs);
                    if !sol.converged {
                        error!(output = *name, index = *k, "adjoint linear solve did not converge");
                    }
                    for (j, &(_, _, at)) in cols.iter().enumerate() {
                        jac[(i, j)] = sol.x[at];
                    }
                }
            }
            _ => {
                for (j, &(name, k, at)) in cols.iter().enumerate() {
                    let mut rhs = DVector::zeros(n);
                    rhs[at] = 1.0;
                    let sol = self.solve(&op, LinearMode::Forward, &rhs);
                    if !sol.converged {
                        error!(param = name, index = k, "forward linear solve did not converge");
                    }
                    for (i, (_, _, weights)) in rows.iter().enumerate() {
                        jac[(i, j)] = weights.iter().map(|&(r, w)| w * sol.x[r]).sum();
                    }
                }
            }
        }
        Ok(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> LinearOperator {
        let mut op = LinearOperator::identity(3);
        op.add(1, 0, -2.0);
        op.add(2, 1, -3.0);
        op
    }

    #[test]
    fn dense_and_gmres_paths_agree() {
        let b = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let dense = LinearSolver::default();
        let krylov = LinearSolver::new(LinearSolverConfig {
            dense_threshold: 0,
            ..Default::default()
        });
        for mode in [LinearMode::Forward, LinearMode::Adjoint] {
            let a = dense.solve(&op(), mode, &b);
            let k = krylov.solve(&op(), mode, &b);
            assert!(a.converged && k.converged);
            assert!((a.x - k.x).amax() < 1e-10);
        }
        let fwd = dense.solve(&op(), LinearMode::Forward, &b);
        let expected = DVector::from_vec(vec![1.0, 2.0, 6.0]);
        assert!((fwd.x - expected).amax() < 1e-12);
    }

    #[test]
    fn singular_dense_system_is_flagged() {
        let op = LinearOperator::new(2);
        let sol = LinearSolver::default().solve(&op, LinearMode::Forward, &DVector::from_element(2, 1.0));
        assert!(!sol.converged);
    }
}
